use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header::HOST},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::{
    handlers::AppState,
    response::{ApiResponse, ResponseCode},
};

/// 请求体转发上限
const MAX_PROXY_BODY: usize = 2 * 1024 * 1024;

/// 逐跳头不随响应转发（RFC 7230 §6.1）
///
/// 响应体已整体读入内存重新发送，原来的 transfer-encoding 与
/// content-length 不再成立，一并剔除，由hyper按实际长度补齐。
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// 过滤出可以端到端转发的响应头
fn forwardable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// 代理转发处理器
///
/// 作为axum的fallback挂载：未被本服务API命中的请求按路由表
/// 解析目标后端并原样转发。
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let target = state.router.resolve(&path).to_string();
    let Some(endpoint) = state.router.target_endpoint(&target) else {
        // new() 校验过目标存在，到这里只可能是编程错误
        warn!(target=%target, "路由目标没有对应的后端基址");
        return ApiResponse::<()>::error(
            ResponseCode::INTERNAL_ERROR,
            "路由目标未配置".to_string(),
        )
        .into_response();
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = format!("{}{}", endpoint.trim_end_matches('/'), path_and_query);
    debug!(path=%path, target=%target, url=%url, "代理转发请求");

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return ApiResponse::<()>::error(
                ResponseCode::BAD_REQUEST,
                format!("读取请求体失败: {}", e),
            )
            .into_response();
        }
    };

    let mut headers = parts.headers;
    headers.remove(HOST);

    let upstream = state
        .proxy_client
        .request(parts.method, url)
        .headers(headers)
        .body(body_bytes.to_vec())
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let status = resp.status();
            let headers = forwardable_headers(resp.headers());
            match resp.bytes().await {
                Ok(bytes) => {
                    let mut response = Response::builder()
                        .status(status)
                        .body(Body::from(bytes))
                        .unwrap_or_else(|_| status.into_response());
                    *response.headers_mut() = headers;
                    response
                }
                Err(e) => {
                    warn!(error=%e, target=%target, "读取后端响应失败");
                    ApiResponse::<()>::error(
                        ResponseCode::INTERNAL_ERROR,
                        format!("读取后端响应失败: {}", e),
                    )
                    .into_response()
                }
            }
        }
        Err(e) => {
            warn!(error=%e, target=%target, "后端转发失败");
            ApiResponse::<()>::error(
                ResponseCode::INTERNAL_ERROR,
                format!("后端转发失败: {}", e),
            )
            .into_response()
        }
    }
}
