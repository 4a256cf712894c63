// 探测任务队列：进程内的 at-least-once 消息存储
pub mod lease;

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DeadLetterEntry, JobMessage, ProbeSpec};
use lease::LeaseManager;

/// 队列统计信息
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    /// 可见（待投递）消息数
    pub visible: usize,
    /// 租约在途消息数
    pub leased: usize,
    /// 死信数
    pub dead: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<JobMessage>,
    /// 在途消息体，按ID索引；租约本身由 LeaseManager 管理
    in_flight: HashMap<Uuid, JobMessage>,
    leases: LeaseManager,
    dead: Vec<DeadLetterEntry>,
}

/// 探测任务队列
///
/// 投递语义为 at-least-once：租约到期未ack的消息会重新可见并再次投递，
/// `receive_count` 每次投递加一。所有状态变更都在同一把异步锁内完成，
/// 保证两个工作协程不可能同时持有同一条消息的活跃租约。
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    /// 入队唤醒，用于 receive_batch 的长轮询
    notify: Notify,
    visibility_timeout: Duration,
}

impl JobQueue {
    pub fn new(visibility_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
        })
    }

    /// 入队一个探测任务，返回消息ID
    pub async fn enqueue(&self, payload: ProbeSpec) -> Uuid {
        let message = JobMessage::new(payload);
        let id = message.id;
        {
            let mut state = self.state.lock().await;
            state.visible.push_back(message);
        }
        self.notify.notify_one();
        id
    }

    /// 批量入队（生产者按 IP 段拆分后一次提交）
    pub async fn enqueue_batch(&self, payloads: Vec<ProbeSpec>) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(payloads.len());
        {
            let mut state = self.state.lock().await;
            for payload in payloads {
                let message = JobMessage::new(payload);
                ids.push(message.id);
                state.visible.push_back(message);
            }
        }
        for _ in 0..ids.len() {
            self.notify.notify_one();
        }
        ids
    }

    /// 批量领取消息
    ///
    /// 聚满 `max_count` 条或 `max_wait` 窗口到期即返回（可能为空）。
    /// 每条返回的消息都带有新授予的租约，`receive_count` 已加一。
    pub async fn receive_batch(&self, max_count: usize, max_wait: Duration) -> Vec<JobMessage> {
        let deadline = Instant::now() + max_wait;
        let worker_id = Uuid::new_v4();
        let ttl = chrono::Duration::from_std(self.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(60));
        let mut collected = Vec::new();

        loop {
            // 先建立等待句柄再检查状态，避免错过入队唤醒
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                Self::requeue_expired_locked(&mut state);
                while collected.len() < max_count {
                    let Some(mut message) = state.visible.pop_front() else {
                        break;
                    };
                    message.receive_count += 1;
                    let lease = state.leases.grant(message.id, worker_id, ttl);
                    message.receipt = lease.receipt;
                    state.in_flight.insert(message.id, message.clone());
                    collected.push(message);
                }
            }

            if collected.len() >= max_count {
                return collected;
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return collected,
            }
        }
    }

    /// 确认消息处理完成，永久删除
    ///
    /// 回执必须与当前租约匹配：消息已被ack、或租约已到期并被重新授予他人时，
    /// 迟到的ack是静默无操作，不会误删他人在途的消息。
    pub async fn ack(&self, id: Uuid, receipt: Uuid) {
        let mut state = self.state.lock().await;
        if state.leases.release(&id, receipt).is_some() {
            state.in_flight.remove(&id);
            debug!(message_id=%id, "消息已确认删除");
        } else {
            debug!(message_id=%id, "ack忽略：回执已失效");
        }
    }

    /// 延长在途消息的租约，回执不匹配时静默忽略
    pub async fn extend_lease(&self, id: Uuid, receipt: Uuid, extra: Duration) {
        let mut state = self.state.lock().await;
        let extra = chrono::Duration::from_std(extra).unwrap_or_else(|_| chrono::Duration::zero());
        if !state.leases.extend(&id, receipt, extra) {
            debug!(message_id=%id, "extend_lease忽略：回执已失效");
        }
    }

    /// 将在途消息移入死信（超过重试上限时由消费方调用）
    pub async fn dead_letter(&self, id: Uuid, receipt: Uuid, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        if state.leases.release(&id, receipt).is_some() {
            if let Some(message) = state.in_flight.remove(&id) {
                let reason = reason.into();
                warn!(message_id=%id, reason=%reason, "消息移入死信");
                state.dead.push(DeadLetterEntry {
                    message,
                    reason,
                    dead_at: Utc::now(),
                });
            }
        }
    }

    /// 列出当前死信
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.state.lock().await.dead.clone()
    }

    /// 将一条死信重新入队，receive_count 清零
    pub async fn requeue_dead(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let pos = state
            .dead
            .iter()
            .position(|e| e.message.id == id)
            .ok_or_else(|| AppError::not_found(format!("死信 {}", id)))?;
        let mut entry = state.dead.remove(pos);
        entry.message.receive_count = 0;
        entry.message.receipt = Uuid::nil();
        state.visible.push_back(entry.message);
        drop(state);
        self.notify.notify_one();
        info!(message_id=%id, "死信已重新入队");
        Ok(())
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats {
            visible: state.visible.len(),
            leased: state.leases.len(),
            dead: state.dead.len(),
        }
    }

    /// 收割到期租约，对应消息重新可见
    fn requeue_expired_locked(state: &mut QueueState) {
        let expired = state.leases.collect_expired(Utc::now());
        for id in expired {
            if let Some(message) = state.in_flight.remove(&id) {
                warn!(message_id=%id, receive_count = message.receive_count, "租约到期，消息重新可见");
                state.visible.push_back(message);
            }
        }
    }

    /// 周期性租约收割循环
    ///
    /// receive_batch 也会顺带收割，这里兜底处理没有消费者在拉取的窗口期。
    pub async fn run_sweeper(self: Arc<Self>, sweep_interval: Duration) {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let redelivered = {
                let mut state = self.state.lock().await;
                let before = state.visible.len();
                Self::requeue_expired_locked(&mut state);
                state.visible.len() - before
            };
            if redelivered > 0 {
                for _ in 0..redelivered {
                    self.notify.notify_one();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec(n: u32) -> ProbeSpec {
        ProbeSpec::pingable(format!("10.0.{}.1", n), format!("10.0.{}.254", n), n)
    }

    #[tokio::test]
    async fn test_enqueue_receive_ack_cycle() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        let id = queue.enqueue(spec(1)).await;

        let batch = queue.receive_batch(2, Duration::from_millis(10)).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].receive_count, 1);
        assert!(!batch[0].receipt.is_nil());

        queue.ack(id, batch[0].receipt).await;
        let stats = queue.stats().await;
        assert_eq!(stats.visible, 0);
        assert_eq!(stats.leased, 0);
    }

    #[tokio::test]
    async fn test_receive_empty_after_wait() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        let batch = queue.receive_batch(2, Duration::from_millis(20)).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_no_double_lease() {
        // 两个并发消费者不可能拿到同一条消息
        let queue = JobQueue::new(Duration::from_secs(3600));
        queue.enqueue_batch((0..20).map(spec).collect()).await;

        let (a, b) = tokio::join!(
            queue.receive_batch(10, Duration::from_millis(50)),
            queue.receive_batch(10, Duration::from_millis(50)),
        );
        let ids: HashSet<Uuid> = a.iter().chain(b.iter()).map(|m| m.id).collect();
        assert_eq!(ids.len(), a.len() + b.len());
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_lease_expiry_redelivers_with_bumped_count() {
        let queue = JobQueue::new(Duration::from_millis(0));
        let id = queue.enqueue(spec(1)).await;

        let first = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(first[0].receive_count, 1);

        // 可见性超时为0，下一次领取即重投
        let second = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(second[0].id, id);
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_ack_after_expiry_is_noop() {
        let queue = JobQueue::new(Duration::from_millis(0));
        let id = queue.enqueue(spec(1)).await;
        let first = queue.receive_batch(1, Duration::from_millis(10)).await;

        // 租约到期后消息被另一消费者重新领取
        let redelivered = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(redelivered.len(), 1);
        assert_ne!(first[0].receipt, redelivered[0].receipt);

        // 第一个消费者迟到的ack回执已失效，不得删除他人在途的消息
        queue.ack(id, first[0].receipt).await;
        let stats = queue.stats().await;
        assert_eq!(stats.leased, 1);

        // 持有当前租约的消费者仍可正常ack
        queue.ack(id, redelivered[0].receipt).await;
        assert_eq!(queue.stats().await.leased, 0);
    }

    #[tokio::test]
    async fn test_stale_receipt_cannot_touch_reassigned_lease() {
        let queue = JobQueue::new(Duration::from_millis(0));
        let id = queue.enqueue(spec(1)).await;
        let first = queue.receive_batch(1, Duration::from_millis(10)).await;
        let second = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(second.len(), 1);

        // 旧回执的死信与延长租约同样是无操作
        queue.dead_letter(id, first[0].receipt, "迟到的死信").await;
        assert!(queue.dead_letters().await.is_empty());
        queue
            .extend_lease(id, first[0].receipt, Duration::from_secs(3600))
            .await;

        // 新租约仍然有效且归第二次投递所有
        let stats = queue.stats().await;
        assert_eq!(stats.leased, 1);
        queue.ack(id, second[0].receipt).await;
        assert_eq!(queue.stats().await.leased, 0);
    }

    #[tokio::test]
    async fn test_receive_returns_when_batch_full() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        queue.enqueue_batch(vec![spec(1), spec(2)]).await;

        // 批次已满时立即返回，无需等满窗口
        let start = std::time::Instant::now();
        let batch = queue.receive_batch(2, Duration::from_secs(300)).await;
        assert_eq!(batch.len(), 2);
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_returned_at_window() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        queue.enqueue(spec(1)).await;

        // 只有1条消息时，批次在窗口到期时以不足额返回
        let batch = queue.receive_batch(2, Duration::from_secs(300)).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_extend_lease_defers_expiry() {
        let queue = JobQueue::new(Duration::from_millis(0));
        let id = queue.enqueue(spec(1)).await;
        let batch = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(batch[0].id, id);

        // 延长租约后消息不会因超时重新可见
        queue
            .extend_lease(id, batch[0].receipt, Duration::from_secs(3600))
            .await;
        let again = queue.receive_batch(1, Duration::from_millis(20)).await;
        assert!(again.is_empty());
        assert_eq!(queue.stats().await.leased, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_and_requeue() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        let id = queue.enqueue(spec(1)).await;
        let received = queue.receive_batch(1, Duration::from_millis(10)).await;

        queue
            .dead_letter(id, received[0].receipt, "超过最大重试次数")
            .await;
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.id, id);
        assert_eq!(queue.stats().await.leased, 0);

        queue.requeue_dead(id).await.unwrap();
        let batch = queue.receive_batch(1, Duration::from_millis(10)).await;
        assert_eq!(batch[0].id, id);
        // 重新入队后计数从零开始
        assert_eq!(batch[0].receive_count, 1);

        assert!(queue.requeue_dead(Uuid::new_v4()).await.is_err());
    }
}
