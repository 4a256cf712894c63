// 对象存储接入与上传事件监视
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{Client, config::Credentials};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    config::StorageConfig,
    error::{AppError, AppResult},
    models::ObjectEvent,
};

/// 对象存储接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 列出指定前缀下的所有对象键
    async fn list_keys(&self, prefix: &str) -> AppResult<Vec<String>>;

    /// 健康检查
    async fn health_check(&self) -> AppResult<bool>;
}

/// S3兼容对象存储实现（支持MinIO等自定义endpoint）
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Arc<Client>,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> AppResult<Self> {
        // 创建自定义凭证
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,        // session token
            None,        // expiration
            "cloudperf", // provider name
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .force_path_style(true) // MinIO需要路径样式
            .behavior_version(BehaviorVersion::latest())
            .build();

        Ok(Self {
            client: Arc::new(Client::from_conf(s3_config)),
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let resp = request
                .send()
                .await
                .map_err(|e| AppError::storage(format!("列举对象失败: {}", e)))?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            match resp.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn health_check(&self) -> AppResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::error!("对象存储健康检查失败: {}", e);
                Ok(false)
            }
        }
    }
}

/// 上传监视器
///
/// 周期性列举命名空间并对比上一轮快照，为新出现的键发出 Created 事件。
/// 重启后会把存量对象重发一遍，这与 at-least-once 的触发契约一致，
/// 幂等处理由导入处理器负责。
pub struct ObjectWatcher {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    poll_interval: Duration,
    seen: HashSet<String>,
}

impl ObjectWatcher {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            poll_interval,
            seen: HashSet::new(),
        }
    }

    /// 监视主循环，向 `events` 通道推送新增对象事件
    pub async fn run(mut self, events: mpsc::Sender<ObjectEvent>) {
        info!(prefix=%self.prefix, interval_secs = self.poll_interval.as_secs(), "上传监视器启动");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(new_events) => {
                    for event in new_events {
                        if events.send(event).await.is_err() {
                            info!("事件通道已关闭，上传监视器退出");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error=%e, "列举对象存储失败，本轮跳过");
                }
            }
        }
    }

    /// 单轮列举，返回新增键的事件
    ///
    /// 快照只保留本轮仍存在的键，已删除对象的记录随之释放；
    /// 删除后重新上传的同名键会再次触发事件。
    async fn poll_once(&mut self) -> AppResult<Vec<ObjectEvent>> {
        let keys = self.store.list_keys(&self.prefix).await?;
        let mut new_events = Vec::new();
        let mut current = HashSet::with_capacity(keys.len());
        for key in keys {
            if !self.seen.contains(&key) {
                debug!(key=%key, "发现新增对象");
                new_events.push(ObjectEvent::created(key.clone()));
            }
            current.insert(key);
        }
        self.seen = current;
        Ok(new_events)
    }
}
