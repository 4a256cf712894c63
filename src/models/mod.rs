// 数据模型模块
pub mod ingest;
pub mod job;
pub mod probe;

pub use ingest::{ImportArtifact, InvokeRequest, InvokeResponse, ObjectEvent, ObjectEventType};
pub use job::{Batch, DeadLetterEntry, JobMessage, Lease};
pub use probe::{ProbeOutcome, ProbeSpec};
