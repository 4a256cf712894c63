use axum::{
    Router,
    extract::{Query, State},
    http::Method,
    response::Json,
    routing::get,
};
use cloudperf_coordinator::{
    config::Config,
    dispatch::{BatchDispatcher, ProbeWorkerPool, RemoteProbeExecutor},
    error::AppResult,
    handlers::AppState,
    ingest::{BootstrapInvoker, FileStateStore, HttpImportProcessor, IngestTrigger},
    producer::{JobProducer, StaticRangeSource},
    queue::JobQueue,
    response::ApiResponse,
    router::{RequestRouter, proxy},
    routes::create_api_routes,
    storage::{ObjectStore, ObjectWatcher, S3ObjectStore},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Deserialize)]
struct HealthQuery {
    #[serde(default)]
    detail: bool,
}

/// 健康检查处理器
async fn health_check(Query(params): Query<HealthQuery>) -> Json<ApiResponse<serde_json::Value>> {
    if params.detail {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut details = HashMap::new();
        details.insert("status", "healthy");
        details.insert("version", "0.1.0");
        details.insert("timestamp", timestamp.as_str());

        Json(ApiResponse::success(serde_json::json!(details)))
    } else {
        Json(ApiResponse::success(serde_json::json!({"status": "ok"})))
    }
}

/// 系统信息处理器
async fn system_info() -> Json<ApiResponse<HashMap<&'static str, serde_json::Value>>> {
    let mut info = HashMap::new();
    info.insert("name", serde_json::json!("Cloudperf Coordinator"));
    info.insert("version", serde_json::json!("0.1.0"));
    info.insert(
        "build_time",
        serde_json::json!(chrono::Utc::now().to_rfc3339()),
    );

    Json(ApiResponse::success(info))
}

/// 队列健康检查处理器
async fn queue_health_check(State(app_state): State<AppState>) -> Json<ApiResponse<serde_json::Value>> {
    let stats = app_state.queue.stats().await;
    Json(ApiResponse::success(serde_json::json!({
        "status": "healthy",
        "visible": stats.visible,
        "leased": stats.leased,
        "dead": stats.dead,
    })))
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudperf_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = match Config::from_file("config.toml") {
        Ok(config) => {
            tracing::info!("已加载配置文件: config.toml");
            config
        }
        Err(_) => {
            tracing::warn!("未找到配置文件，使用默认配置");
            let default_config = Config::default();
            // 保存默认配置到文件
            if let Err(e) = default_config.save_to_file("config.toml") {
                tracing::warn!("保存默认配置失败: {}", e);
            }
            default_config
        }
    };

    tracing::info!("服务器配置: {}", config.server_addr());

    // 导入处理器客户端（引导与触发共用）
    let import_processor = Arc::new(HttpImportProcessor::new(
        config.ingest.processor_endpoint.clone(),
        config.ingest.invoke_timeout_secs,
    )?);

    // 初始化引导：恰好执行一次，失败即中止部署
    if config.bootstrap.enabled {
        let store = Arc::new(FileStateStore::new(config.bootstrap.state_path.clone()));
        let invoker = BootstrapInvoker::new(store, import_processor.clone());
        invoker.run().await?;
    } else {
        tracing::info!("初始化引导已禁用");
    }

    // 创建任务队列并启动租约收割
    let queue = JobQueue::new(Duration::from_secs(config.queue.visibility_timeout_secs));
    tokio::spawn(
        queue
            .clone()
            .run_sweeper(Duration::from_secs(config.queue.sweep_interval_secs)),
    );

    // 启动批次分发器与探测工作池
    let executor = Arc::new(RemoteProbeExecutor::new(&config.probe)?);
    let pool = ProbeWorkerPool::new(queue.clone(), executor, config.queue.max_receive_count);
    let dispatcher = BatchDispatcher::new(
        queue.clone(),
        pool,
        config.queue.batch_size,
        Duration::from_secs(config.queue.max_batching_window_secs),
        config.queue.max_concurrency,
    );
    tracing::info!(
        batch_size = config.queue.batch_size,
        max_concurrency = config.queue.max_concurrency,
        "启动批次分发器"
    );
    tokio::spawn(dispatcher.run());

    // 初始化对象存储与上传监视（连接失败则继续启动，但记录警告）
    let store = Arc::new(S3ObjectStore::new(config.storage.clone()).await?);
    match store.health_check().await {
        Ok(true) => tracing::info!("对象存储连接正常"),
        _ => tracing::warn!("对象存储不可用，导入触发将在存储恢复后生效"),
    }
    let (event_tx, event_rx) = mpsc::channel(64);
    let watcher = ObjectWatcher::new(
        store.clone(),
        config.ingest.watch_prefix.clone(),
        Duration::from_secs(config.ingest.poll_interval_secs),
    );
    tokio::spawn(watcher.run(event_tx));

    // 启动导入触发器
    let trigger = IngestTrigger::new(config.ingest.filters.clone(), import_processor.clone());
    tokio::spawn(trigger.run(event_rx));

    // 启动任务生产器
    if config.producer.enabled {
        let source = Arc::new(StaticRangeSource::new(config.producer.ranges.clone()));
        let producer = JobProducer::new(
            queue.clone(),
            source,
            Duration::from_secs(config.producer.interval_secs),
            config.producer.busy_threshold,
            config.producer.range_limit,
        );
        tracing::info!("启动任务生产器，间隔: {}秒", config.producer.interval_secs);
        tokio::spawn(producer.run());
    } else {
        tracing::info!("任务生产器已禁用");
    }

    // 构建请求路由器
    let router = Arc::new(RequestRouter::new(
        config.router.rules.clone(),
        config.router.targets.clone(),
    )?);

    // 创建应用状态
    let app_state = AppState {
        queue,
        router,
        proxy_client: reqwest::Client::new(),
        config: config.clone(),
    };

    // 创建CORS中间件
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // 创建主路由：本服务API优先，未命中的请求按路由表转发后端
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/system/info", get(system_info))
        .route("/api/health/queue", get(queue_health_check))
        .merge(create_api_routes())
        .fallback(proxy::forward)
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // 启动服务器
    let listener = tokio::net::TcpListener::bind(&config.server_addr()).await?;
    tracing::info!("🚀 服务器启动成功，监听地址: {}", config.server_addr());

    axum::serve(listener, app).await?;

    Ok(())
}
