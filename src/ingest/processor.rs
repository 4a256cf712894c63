use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{InvokeRequest, InvokeResponse},
};

/// 导入处理器调用接口
///
/// 处理器负责真正执行SQL导入与初始化，并要求幂等：
/// 触发侧是 at-least-once，同一制品可能被重复调用。
#[async_trait]
pub trait ImportProcessor: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> AppResult<InvokeResponse>;
}

/// 通过HTTP调用远端导入处理器
#[derive(Debug, Clone)]
pub struct HttpImportProcessor {
    http: Client,
    endpoint: String,
}

impl HttpImportProcessor {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ImportProcessor for HttpImportProcessor {
    async fn invoke(&self, request: InvokeRequest) -> AppResult<InvokeResponse> {
        let resp = self
            .http
            .post(format!("{}/invoke", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::invoke(format!("导入处理器请求失败: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let preview = resp
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect::<String>();
            return Err(AppError::invoke(format!(
                "导入处理器返回错误: status={}, body_preview={}",
                status, preview
            )));
        }

        let result: InvokeResponse = resp
            .json()
            .await
            .map_err(|e| AppError::invoke(format!("解析导入处理器响应失败: {}", e)))?;
        Ok(result)
    }
}
