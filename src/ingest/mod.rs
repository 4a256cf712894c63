// 导入触发：对象存储上传事件 -> 导入处理器调用
pub mod bootstrap;
pub mod processor;

pub use bootstrap::{BootstrapInvoker, BootstrapState, BootstrapStateStore, FileStateStore};
pub use processor::{HttpImportProcessor, ImportProcessor};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chrono::Utc;

use crate::models::{ImportArtifact, InvokeRequest, ObjectEvent, ObjectEventType};

/// 上传事件过滤器，按 (前缀, 后缀) 匹配对象键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestFilter {
    pub prefix: String,
    pub suffix: String,
}

impl IngestFilter {
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix) && key.ends_with(&self.suffix)
    }
}

/// 导入触发器
///
/// 消费对象存储的上传事件；每命中一个过滤器就异步调用一次导入处理器，
/// 随后立即回到空闲，不等待也不重试——失败处理是导入处理器自己的职责。
pub struct IngestTrigger {
    filters: Vec<IngestFilter>,
    processor: Arc<dyn ImportProcessor>,
}

impl IngestTrigger {
    pub fn new(filters: Vec<IngestFilter>, processor: Arc<dyn ImportProcessor>) -> Self {
        Self { filters, processor }
    }

    /// 事件消费主循环，通道关闭时退出
    pub async fn run(self, mut events: mpsc::Receiver<ObjectEvent>) {
        info!(filters = self.filters.len(), "导入触发器启动");
        while let Some(event) = events.recv().await {
            self.handle_event(&event);
        }
        info!("事件通道已关闭，导入触发器退出");
    }

    /// 处理一个上传事件，返回触发的调用数
    ///
    /// 多个过滤器相互独立，同一个键可能触发多次调用。
    pub fn handle_event(&self, event: &ObjectEvent) -> usize {
        if event.event_type != ObjectEventType::Created {
            return 0;
        }
        let mut fired = 0;
        for filter in &self.filters {
            if !filter.matches(&event.key) {
                debug!(key=%event.key, prefix=%filter.prefix, suffix=%filter.suffix, "事件未命中过滤器");
                continue;
            }
            fired += 1;
            let artifact = ImportArtifact {
                key: event.key.clone(),
                upload_time: Utc::now(),
            };
            info!(key=%artifact.key, upload_time=%artifact.upload_time, "上传命中过滤器，调用导入处理器");
            let processor = self.processor.clone();
            let request = InvokeRequest::exec_sqlfile(&artifact.key);
            tokio::spawn(async move {
                match processor.invoke(request.clone()).await {
                    Ok(resp) if resp.is_success() => {
                        info!(param=%request.param, "导入处理器调用完成");
                    }
                    Ok(resp) => {
                        warn!(param=%request.param, status = resp.status, msg=%resp.msg, "导入处理器返回失败");
                    }
                    Err(e) => {
                        warn!(param=%request.param, error=%e, "导入处理器调用出错");
                    }
                }
            });
        }
        fired
    }
}
