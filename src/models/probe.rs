use serde::{Deserialize, Serialize};

/// 探测任务描述
///
/// 由生产者按 IP 段拆分生成，队列本身不关心其内容。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeSpec {
    /// 任务类型，目前仅 "pingable"
    #[serde(rename = "type")]
    pub kind: String,
    pub start_ip: String,
    pub end_ip: String,
    pub city_id: u32,
}

impl ProbeSpec {
    pub fn pingable(start_ip: impl Into<String>, end_ip: impl Into<String>, city_id: u32) -> Self {
        Self {
            kind: "pingable".to_string(),
            start_ip: start_ip.into(),
            end_ip: end_ip.into(),
            city_id,
        }
    }

    /// 渲染为探测代理可执行的 fping 命令
    pub fn render_command(&self) -> String {
        format!("fping -g {} {} -r 2 -a -q", self.start_ip, self.end_ip)
    }
}

/// 单个探测任务的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    /// 探测到可达的IP列表（失败时为空）
    #[serde(default)]
    pub alive_ips: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}
