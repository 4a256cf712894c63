use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 对象存储事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectEventType {
    Created,
}

/// 对象存储上传事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectEvent {
    pub key: String,
    pub event_type: ObjectEventType,
}

impl ObjectEvent {
    pub fn created(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            event_type: ObjectEventType::Created,
        }
    }
}

/// 匹配导入过滤器的上传制品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportArtifact {
    pub key: String,
    pub upload_time: DateTime<Utc>,
}

/// 导入处理器调用请求
///
/// 形如 `{"action":"exec_sql","param":"init_db"}` 或
/// `{"action":"exec_sqlfile","param":"import-sql/country.zip"}`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvokeRequest {
    pub action: String,
    pub param: String,
}

impl InvokeRequest {
    pub fn exec_sql(param: impl Into<String>) -> Self {
        Self {
            action: "exec_sql".to_string(),
            param: param.into(),
        }
    }

    pub fn exec_sqlfile(param: impl Into<String>) -> Self {
        Self {
            action: "exec_sqlfile".to_string(),
            param: param.into(),
        }
    }
}

/// 导入处理器调用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub status: i32,
    pub msg: String,
}

impl InvokeResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}
