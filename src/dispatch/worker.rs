use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    config::ProbeConfig,
    error::{AppError, AppResult},
    models::{Batch, JobMessage, ProbeOutcome},
    queue::JobQueue,
};

/// 探测执行器接口
///
/// 实际的 fping 测量由外部探测代理完成，这里只定义调用边界。
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn execute(&self, job: &JobMessage) -> AppResult<ProbeOutcome>;
}

/// 通过HTTP调用远端探测代理的执行器
#[derive(Debug, Clone)]
pub struct RemoteProbeExecutor {
    http: Client,
    agent_endpoint: String,
}

impl RemoteProbeExecutor {
    pub fn new(config: &ProbeConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self {
            http,
            agent_endpoint: config.agent_endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProbeExecutor for RemoteProbeExecutor {
    async fn execute(&self, job: &JobMessage) -> AppResult<ProbeOutcome> {
        let body = json!({
            "jobid": job.id,
            "command": job.payload.render_command(),
            "city_id": job.payload.city_id,
        });
        let resp = self
            .http
            .post(format!("{}/probe", self.agent_endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::probe(format!("探测代理请求失败: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let preview = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect::<String>();
            return Err(AppError::probe(format!(
                "探测代理返回错误: status={}, body_preview={}",
                status, preview
            )));
        }

        let outcome: ProbeOutcome = resp
            .json()
            .await
            .map_err(|e| AppError::probe(format!("解析探测结果失败: {}", e)))?;
        Ok(outcome)
    }
}

/// 探测工作池
///
/// 逐条执行批次内的消息：成功则ack，失败不做任何动作，
/// 等待租约到期后由队列重新投递；达到重试上限的消息改走死信。
#[derive(Clone)]
pub struct ProbeWorkerPool {
    queue: Arc<JobQueue>,
    executor: Arc<dyn ProbeExecutor>,
    max_receive_count: u32,
}

impl ProbeWorkerPool {
    pub fn new(queue: Arc<JobQueue>, executor: Arc<dyn ProbeExecutor>, max_receive_count: u32) -> Self {
        Self {
            queue,
            executor,
            max_receive_count,
        }
    }

    /// 处理一个批次，消息之间互不影响
    pub async fn process_batch(&self, batch: Batch) {
        for message in batch.messages {
            self.process_one(message).await;
        }
    }

    async fn process_one(&self, message: JobMessage) {
        // 消费方的重试上限策略：超限消息不再执行，移入死信
        if message.receive_count > self.max_receive_count {
            self.queue
                .dead_letter(
                    message.id,
                    message.receipt,
                    format!(
                        "投递次数 {} 超过上限 {}",
                        message.receive_count, self.max_receive_count
                    ),
                )
                .await;
            return;
        }

        match self.executor.execute(&message).await {
            Ok(outcome) if outcome.success => {
                debug!(message_id=%message.id, alive = outcome.alive_ips.len(), "探测完成");
                self.queue.ack(message.id, message.receipt).await;
            }
            Ok(outcome) => {
                // 不ack，租约到期后重投
                info!(
                    message_id=%message.id,
                    receive_count = message.receive_count,
                    msg = outcome.message.as_deref().unwrap_or(""),
                    "探测代理报告失败，等待重投"
                );
            }
            Err(e) => {
                warn!(message_id=%message.id, error=%e, "探测执行出错，等待重投");
            }
        }
    }
}
