use crate::handlers::{
    AppState, enqueue_jobs, list_dead_letters, list_route_rules, queue_stats,
    requeue_dead_letter,
};
use axum::{
    Router,
    routing::{get, post},
};

/// 创建API路由
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        // 任务提交与队列观测
        .route("/api/jobs", post(enqueue_jobs)) // 提交探测任务
        .route("/api/queue/stats", get(queue_stats)) // 队列统计
        .route("/api/queue/dead-letters", get(list_dead_letters)) // 死信列表
        .route(
            "/api/queue/dead-letters/{id}/requeue",
            post(requeue_dead_letter),
        ) // 死信重新入队
        // 路由表观测
        .route("/api/router/rules", get(list_route_rules))
}
