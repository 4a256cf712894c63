use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    error::{AppError, AppResult},
    models::InvokeRequest,
};

use super::processor::ImportProcessor;

/// 初始化引导状态机：NotRun -> Running -> Done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    NotRun,
    Running,
    Done,
}

/// 引导状态存储
///
/// 状态必须落在进程外可见的持久位置，并以条件写保证
/// 两个并发的部署流程不可能同时从 NotRun 进入 Running。
#[async_trait]
pub trait BootstrapStateStore: Send + Sync {
    /// 尝试 NotRun -> Running 的条件转移
    ///
    /// 返回 `Ok(true)` 表示本方赢得执行权；`Ok(false)` 表示已经 Done（幂等跳过）；
    /// 处于 Running（他方在跑，或上次失败遗留）时返回错误，需要运维介入。
    async fn try_begin(&self) -> AppResult<bool>;

    /// Running -> Done
    async fn complete(&self) -> AppResult<()>;

    /// 读取当前状态
    async fn current(&self) -> AppResult<BootstrapState>;
}

/// 基于标记文件的状态存储
///
/// `create_new` 创建标记文件充当条件写：并发的第二个创建者会直接失败。
/// Done 状态通过临时文件加原子改名写入。
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_state(&self) -> AppResult<BootstrapState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let state: BootstrapState = serde_json::from_str(content.trim())?;
                Ok(state)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BootstrapState::NotRun),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BootstrapStateStore for FileStateStore {
    async fn try_begin(&self) -> AppResult<bool> {
        match self.read_state()? {
            BootstrapState::Done => return Ok(false),
            BootstrapState::Running => {
                return Err(AppError::bootstrap(format!(
                    "引导状态为 running，可能有并发部署或上次失败遗留，需人工清理标记文件: {}",
                    self.path.display()
                )));
            }
            BootstrapState::NotRun => {}
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // create_new 即条件写：并发竞争者中只有一方成功
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                file.write_all(serde_json::to_string(&BootstrapState::Running)?.as_bytes())?;
                file.sync_all()?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AppError::bootstrap("引导状态标记已被并发部署抢占".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn complete(&self) -> AppResult<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string(&BootstrapState::Done)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    async fn current(&self) -> AppResult<BootstrapState> {
        self.read_state()
    }
}

/// 初始化引导调用器
///
/// 整个部署生命周期内恰好执行一次 `{action:"exec_sql", param:"init_db"}`。
/// 调用失败视为部署失败（不自动重试）；重复部署时 Done 状态直接跳过，
/// 重复初始化的检测由被调用的导入处理器自身保证。
pub struct BootstrapInvoker {
    store: Arc<dyn BootstrapStateStore>,
    processor: Arc<dyn ImportProcessor>,
}

impl BootstrapInvoker {
    pub fn new(store: Arc<dyn BootstrapStateStore>, processor: Arc<dyn ImportProcessor>) -> Self {
        Self { store, processor }
    }

    /// 执行一次引导，返回是否真正发起了初始化调用
    pub async fn run(&self) -> AppResult<bool> {
        if !self.store.try_begin().await? {
            info!("初始化已完成，跳过引导");
            return Ok(false);
        }

        info!("开始数据库初始化引导");
        let request = InvokeRequest::exec_sql("init_db");
        match self.processor.invoke(request).await {
            Ok(resp) if resp.is_success() => {
                self.store.complete().await?;
                info!(msg=%resp.msg, "初始化引导完成");
                Ok(true)
            }
            Ok(resp) => {
                // 标记保持 running，阻止后续部署静默跳过半初始化状态
                error!(status = resp.status, msg=%resp.msg, "初始化引导返回失败，部署中止");
                Err(AppError::bootstrap(format!(
                    "init_db 返回失败: status={}, msg={}",
                    resp.status, resp.msg
                )))
            }
            Err(e) => {
                error!(error=%e, "初始化引导调用出错，部署中止");
                Err(AppError::bootstrap(format!("init_db 调用出错: {}", e)))
            }
        }
    }
}
