use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::probe::ProbeSpec;

/// 队列中的探测任务消息
///
/// `receive_count` 在每次投递时加一，消费方据此判断是否超过重试上限。
/// `receipt` 是本次投递的回执，每次投递重新生成；ack、延长租约与移入死信
/// 都必须携带当前租约的回执，过期投递的迟到操作因此成为无操作。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub id: Uuid,
    pub payload: ProbeSpec,
    pub enqueue_time: DateTime<Utc>,
    pub receive_count: u32,
    pub receipt: Uuid,
}

impl JobMessage {
    pub fn new(payload: ProbeSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueue_time: Utc::now(),
            receive_count: 0,
            receipt: Uuid::nil(),
        }
    }
}

/// 某条消息当前的租约
///
/// 同一时刻一条消息至多存在一个活跃租约；`receipt` 标识授予租约的那次投递。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub message_id: Uuid,
    pub worker_id: Uuid,
    pub receipt: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// 一次投递给单个工作协程的消息批次
#[derive(Debug, Clone)]
pub struct Batch {
    pub messages: Vec<JobMessage>,
    pub received_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(messages: Vec<JobMessage>) -> Self {
        Self {
            messages,
            received_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// 死信记录：超过重试上限后从正常投递循环移出的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub message: JobMessage,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}
