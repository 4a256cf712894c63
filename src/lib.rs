pub mod config;
pub mod error;
pub mod response;

pub mod dispatch;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod producer;
pub mod queue;
pub mod router;
pub mod routes;
pub mod storage;
