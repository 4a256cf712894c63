// 批次分发：从队列领取批次并在并发上限内派发给工作池
pub mod worker;

pub use worker::{ProbeExecutor, ProbeWorkerPool, RemoteProbeExecutor};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::{models::Batch, queue::JobQueue};

/// 批次分发器
///
/// 不断调用 `receive_batch(batch_size, max_batching_window)` 领取批次，
/// 以信号量限制同时在途的批次数：许可耗尽时不再发起领取，
/// 这是对下游探测执行的主要背压手段。
pub struct BatchDispatcher {
    queue: Arc<JobQueue>,
    pool: ProbeWorkerPool,
    batch_size: usize,
    max_batching_window: Duration,
    in_flight: Arc<Semaphore>,
}

impl BatchDispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        pool: ProbeWorkerPool,
        batch_size: usize,
        max_batching_window: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            queue,
            pool,
            batch_size,
            max_batching_window,
            in_flight: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// 分发主循环
    pub async fn run(self) {
        info!(
            batch_size = self.batch_size,
            max_batching_window_secs = self.max_batching_window.as_secs(),
            max_concurrency = self.in_flight.available_permits(),
            "批次分发器启动"
        );
        loop {
            // 先占许可再领取，保证在途批次数不超过上限
            let permit = match self.in_flight.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let messages = self
                .queue
                .receive_batch(self.batch_size, self.max_batching_window)
                .await;
            if messages.is_empty() {
                drop(permit);
                continue;
            }

            debug!(count = messages.len(), "领取到批次，派发工作协程");
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.process_batch(Batch::new(messages)).await;
                drop(permit);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppResult;
    use crate::models::{JobMessage, ProbeOutcome, ProbeSpec};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录并发执行峰值的执行器
    struct GaugeExecutor {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProbeExecutor for GaugeExecutor {
        async fn execute(&self, _job: &JobMessage) -> AppResult<ProbeOutcome> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ProbeOutcome {
                success: true,
                alive_ips: vec![],
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_under_burst() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        let specs: Vec<ProbeSpec> = (0..30)
            .map(|n| ProbeSpec::pingable(format!("10.1.{}.1", n), format!("10.1.{}.8", n), n))
            .collect();
        queue.enqueue_batch(specs).await;

        let executor = Arc::new(GaugeExecutor {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ProbeWorkerPool::new(queue.clone(), executor.clone(), 5);
        let max_concurrency = 3;
        let dispatcher = BatchDispatcher::new(
            queue.clone(),
            pool,
            1,
            Duration::from_millis(20),
            max_concurrency,
        );
        let handle = tokio::spawn(dispatcher.run());

        // 等待突发消息全部消化
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let stats = queue.stats().await;
            if stats.visible == 0 && stats.leased == 0 {
                break;
            }
        }
        handle.abort();

        let stats = queue.stats().await;
        assert_eq!(stats.visible, 0);
        assert_eq!(stats.leased, 0);
        assert!(executor.peak.load(Ordering::SeqCst) <= max_concurrency);
    }

    #[tokio::test]
    async fn test_dispatches_partial_batch() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        queue
            .enqueue(ProbeSpec::pingable("10.2.0.1", "10.2.0.8", 1))
            .await;

        let executor = Arc::new(GaugeExecutor {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = ProbeWorkerPool::new(queue.clone(), executor, 5);
        // 批次大小为2但只有1条消息，窗口到期后仍应派发
        let dispatcher =
            BatchDispatcher::new(queue.clone(), pool, 2, Duration::from_millis(30), 10);
        let handle = tokio::spawn(dispatcher.run());

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let stats = queue.stats().await;
            if stats.visible == 0 && stats.leased == 0 {
                break;
            }
        }
        handle.abort();

        let stats = queue.stats().await;
        assert_eq!(stats.visible, 0);
        assert_eq!(stats.leased, 0);
    }
}
