// API处理器模块
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AppResult},
    models::{DeadLetterEntry, ProbeSpec},
    queue::{JobQueue, QueueStats},
    response::ApiResponse,
    router::RequestRouter,
};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub router: Arc<RequestRouter>,
    pub proxy_client: reqwest::Client,
    pub config: Config,
}

/// 入队请求
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub jobs: Vec<ProbeSpec>,
}

/// 入队结果
#[derive(Debug, Serialize)]
pub struct EnqueueResult {
    pub ids: Vec<Uuid>,
}

/// 提交探测任务
pub async fn enqueue_jobs(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> AppResult<Json<ApiResponse<EnqueueResult>>> {
    if request.jobs.is_empty() {
        return Err(AppError::bad_request("任务列表不能为空"));
    }
    let count = request.jobs.len();
    let ids = state.queue.enqueue_batch(request.jobs).await;
    info!(count, "API提交探测任务");
    Ok(Json(ApiResponse::success(EnqueueResult { ids })))
}

/// 查询队列统计
pub async fn queue_stats(State(state): State<AppState>) -> Json<ApiResponse<QueueStats>> {
    Json(ApiResponse::success(state.queue.stats().await))
}

/// 列出死信
pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<DeadLetterEntry>>> {
    Json(ApiResponse::success(state.queue.dead_letters().await))
}

/// 将死信重新入队
pub async fn requeue_dead_letter(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.queue.requeue_dead(id).await?;
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// 查看路由规则表（运维排障用）
pub async fn list_route_rules(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<crate::router::RouteRule>>> {
    Json(ApiResponse::success(state.router.rules().to_vec()))
}
