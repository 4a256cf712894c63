use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::Lease;

/// 租约管理器
///
/// 维护消息ID到租约到期时间的映射。调用方（队列）持有锁保证互斥，
/// 因此同一条消息在任意时刻至多存在一个活跃租约。
#[derive(Debug, Default)]
pub struct LeaseManager {
    leases: HashMap<Uuid, Lease>,
}

impl LeaseManager {
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
        }
    }

    /// 为一条消息授予租约，返回租约副本（含本次投递的回执）
    ///
    /// 前置条件：该消息当前没有活跃租约。
    pub fn grant(&mut self, message_id: Uuid, worker_id: Uuid, ttl: Duration) -> Lease {
        debug_assert!(!self.leases.contains_key(&message_id));
        let lease = Lease {
            message_id,
            worker_id,
            receipt: Uuid::new_v4(),
            expires_at: Utc::now() + ttl,
        };
        self.leases.insert(message_id, lease.clone());
        lease
    }

    /// 释放租约（ack或死信时）
    ///
    /// 回执不匹配说明该租约已到期并被重新授予他人，迟到的释放是无操作。
    pub fn release(&mut self, message_id: &Uuid, receipt: Uuid) -> Option<Lease> {
        if self.leases.get(message_id)?.receipt != receipt {
            return None;
        }
        self.leases.remove(message_id)
    }

    /// 延长租约，不存在或回执不匹配则静默忽略
    pub fn extend(&mut self, message_id: &Uuid, receipt: Uuid, extra: Duration) -> bool {
        match self.leases.get_mut(message_id) {
            Some(lease) if lease.receipt == receipt => {
                lease.expires_at += extra;
                true
            }
            _ => false,
        }
    }

    pub fn is_leased(&self, message_id: &Uuid) -> bool {
        self.leases.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// 收割所有已到期的租约，返回对应消息ID
    ///
    /// 到期的租约被移除，消息随后重新可见（at-least-once 的重投递路径）。
    pub fn collect_expired(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<Uuid> = self
            .leases
            .values()
            .filter(|l| l.expires_at <= now)
            .map(|l| l.message_id)
            .collect();
        for id in &expired {
            self.leases.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_release() {
        let mut mgr = LeaseManager::new();
        let msg_id = Uuid::new_v4();
        let worker_id = Uuid::new_v4();
        let lease = mgr.grant(msg_id, worker_id, Duration::minutes(60));
        assert_eq!(lease.message_id, msg_id);
        assert!(mgr.is_leased(&msg_id));

        let released = mgr.release(&msg_id, lease.receipt).unwrap();
        assert_eq!(released.worker_id, worker_id);
        assert!(!mgr.is_leased(&msg_id));
        // 重复释放是无操作
        assert!(mgr.release(&msg_id, lease.receipt).is_none());
    }

    #[test]
    fn test_release_requires_matching_receipt() {
        let mut mgr = LeaseManager::new();
        let msg_id = Uuid::new_v4();
        let lease = mgr.grant(msg_id, Uuid::new_v4(), Duration::minutes(60));

        // 旧投递的回执不能释放新授予的租约
        assert!(mgr.release(&msg_id, Uuid::new_v4()).is_none());
        assert!(mgr.is_leased(&msg_id));
        assert!(mgr.release(&msg_id, lease.receipt).is_some());
    }

    #[test]
    fn test_extend_missing_or_stale_lease() {
        let mut mgr = LeaseManager::new();
        assert!(!mgr.extend(&Uuid::new_v4(), Uuid::new_v4(), Duration::minutes(5)));

        let msg_id = Uuid::new_v4();
        let lease = mgr.grant(msg_id, Uuid::new_v4(), Duration::minutes(60));
        assert!(!mgr.extend(&msg_id, Uuid::new_v4(), Duration::minutes(5)));
        assert!(mgr.extend(&msg_id, lease.receipt, Duration::minutes(5)));
    }

    #[test]
    fn test_collect_expired() {
        let mut mgr = LeaseManager::new();
        let expired_id = Uuid::new_v4();
        let live_id = Uuid::new_v4();
        mgr.grant(expired_id, Uuid::new_v4(), Duration::seconds(-1));
        mgr.grant(live_id, Uuid::new_v4(), Duration::minutes(60));

        let expired = mgr.collect_expired(Utc::now());
        assert_eq!(expired, vec![expired_id]);
        assert!(!mgr.is_leased(&expired_id));
        assert!(mgr.is_leased(&live_id));
    }
}
