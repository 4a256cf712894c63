// 任务生产：周期性把到期的IP段拆分为探测任务入队
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::{
    error::{AppError, AppResult},
    models::ProbeSpec,
    queue::JobQueue,
};

/// 待探测的IP段
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpRange {
    pub start_ip: String,
    pub end_ip: String,
    pub city_id: u32,
}

/// IP段来源
///
/// 背后的段库（哪些段到期需要刷新）不在本服务范围内，这里只定义取数边界。
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// 取出最多 `limit` 个到期待刷新的IP段
    async fn due_ranges(&self, limit: usize) -> AppResult<Vec<IpRange>>;
}

/// 配置驱动的静态段来源
#[derive(Debug, Clone)]
pub struct StaticRangeSource {
    ranges: Vec<IpRange>,
}

impl StaticRangeSource {
    pub fn new(ranges: Vec<IpRange>) -> Self {
        Self { ranges }
    }
}

#[async_trait]
impl RangeSource for StaticRangeSource {
    async fn due_ranges(&self, limit: usize) -> AppResult<Vec<IpRange>> {
        Ok(self.ranges.iter().take(limit).cloned().collect())
    }
}

/// 把一个IP段拆分为不超过256个地址的子段
///
/// fping 单次任务保持小粒度，探测失败重投时的代价也更小。
pub fn split_ip_range(range: &IpRange) -> AppResult<Vec<ProbeSpec>> {
    let start: u32 = range
        .start_ip
        .parse::<Ipv4Addr>()
        .map_err(|e| AppError::bad_request(format!("非法的起始IP {}: {}", range.start_ip, e)))?
        .into();
    let end: u32 = range
        .end_ip
        .parse::<Ipv4Addr>()
        .map_err(|e| AppError::bad_request(format!("非法的结束IP {}: {}", range.end_ip, e)))?
        .into();
    if start > end {
        return Err(AppError::bad_request(format!(
            "IP段起止颠倒: {} > {}",
            range.start_ip, range.end_ip
        )));
    }

    let mut specs = Vec::new();
    let mut cursor = start;
    loop {
        let chunk_end = cursor.saturating_add(255).min(end);
        specs.push(ProbeSpec::pingable(
            Ipv4Addr::from(cursor).to_string(),
            Ipv4Addr::from(chunk_end).to_string(),
            range.city_id,
        ));
        if chunk_end >= end {
            break;
        }
        cursor = chunk_end + 1;
    }
    Ok(specs)
}

/// 任务生产器
///
/// 队列积压超过阈值时跳过本轮，避免探测下游被持续压垮。
pub struct JobProducer {
    queue: Arc<JobQueue>,
    source: Arc<dyn RangeSource>,
    produce_interval: Duration,
    busy_threshold: usize,
    range_limit: usize,
}

impl JobProducer {
    pub fn new(
        queue: Arc<JobQueue>,
        source: Arc<dyn RangeSource>,
        produce_interval: Duration,
        busy_threshold: usize,
        range_limit: usize,
    ) -> Self {
        Self {
            queue,
            source,
            produce_interval,
            busy_threshold,
            range_limit,
        }
    }

    pub async fn run(self) {
        info!(
            interval_secs = self.produce_interval.as_secs(),
            busy_threshold = self.busy_threshold,
            "任务生产器启动"
        );
        let mut ticker = interval(self.produce_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick_once().await {
                warn!(error=%e, "任务生产执行失败");
            }
        }
    }

    /// 单轮生产，返回入队的任务数
    pub async fn tick_once(&self) -> AppResult<usize> {
        let stats = self.queue.stats().await;
        if stats.visible >= self.busy_threshold {
            info!(visible = stats.visible, "队列繁忙，跳过本轮生产");
            return Ok(0);
        }

        let ranges = self.source.due_ranges(self.range_limit).await?;
        let mut specs = Vec::new();
        for range in &ranges {
            specs.extend(split_ip_range(range)?);
        }
        if specs.is_empty() {
            return Ok(0);
        }

        let count = specs.len();
        self.queue.enqueue_batch(specs).await;
        info!(ranges = ranges.len(), jobs = count, "探测任务已入队");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, end: &str) -> IpRange {
        IpRange {
            start_ip: start.to_string(),
            end_ip: end.to_string(),
            city_id: 9,
        }
    }

    #[test]
    fn test_split_small_range() {
        let specs = split_ip_range(&range("8.8.8.5", "8.8.8.10")).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].start_ip, "8.8.8.5");
        assert_eq!(specs[0].end_ip, "8.8.8.10");
        assert_eq!(specs[0].city_id, 9);
    }

    #[test]
    fn test_split_large_range_into_chunks() {
        let specs = split_ip_range(&range("10.0.0.0", "10.0.2.255")).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].end_ip, "10.0.0.255");
        assert_eq!(specs[1].start_ip, "10.0.1.0");
        assert_eq!(specs[2].end_ip, "10.0.2.255");
    }

    #[test]
    fn test_split_rejects_inverted_range() {
        assert!(split_ip_range(&range("10.0.1.0", "10.0.0.0")).is_err());
        assert!(split_ip_range(&range("bogus", "10.0.0.0")).is_err());
    }

    #[tokio::test]
    async fn test_busy_queue_skips_round() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        for n in 0..5 {
            queue
                .enqueue(ProbeSpec::pingable(
                    format!("10.9.{}.1", n),
                    format!("10.9.{}.8", n),
                    n,
                ))
                .await;
        }

        let source = Arc::new(StaticRangeSource::new(vec![range("10.0.0.0", "10.0.0.255")]));
        let producer = JobProducer::new(queue.clone(), source, Duration::from_secs(60), 5, 2);
        assert_eq!(producer.tick_once().await.unwrap(), 0);
        assert_eq!(queue.stats().await.visible, 5);
    }

    #[tokio::test]
    async fn test_produces_split_jobs() {
        let queue = JobQueue::new(Duration::from_secs(3600));
        let source = Arc::new(StaticRangeSource::new(vec![
            range("10.0.0.0", "10.0.1.255"),
            range("192.168.0.0", "192.168.0.63"),
        ]));
        let producer = JobProducer::new(queue.clone(), source, Duration::from_secs(60), 100, 2);

        assert_eq!(producer.tick_once().await.unwrap(), 3);
        assert_eq!(queue.stats().await.visible, 3);
    }
}
