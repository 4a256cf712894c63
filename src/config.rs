use crate::error::{AppError, AppResult};
use crate::ingest::IngestFilter;
use crate::producer::IpRange;
use crate::router::RouteRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub probe: ProbeConfig,
    pub ingest: IngestConfig,
    pub bootstrap: BootstrapConfig,
    pub storage: StorageConfig,
    pub router: RouterConfig,
    pub producer: ProducerConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 队列与分发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 单批次消息数
    pub batch_size: usize,
    /// 批次聚合窗口（秒）
    pub max_batching_window_secs: u64,
    /// 同时在途批次上限
    pub max_concurrency: usize,
    /// 消息可见性超时（秒），按单个任务最坏处理时长设定。
    /// 必须大于聚合窗口，否则消息可能在凑批期间就被收割重投。
    pub visibility_timeout_secs: u64,
    /// 投递次数上限，超过即移入死信
    pub max_receive_count: u32,
    /// 租约收割间隔（秒）
    pub sweep_interval_secs: u64,
}

/// 探测代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub agent_endpoint: String,
    pub timeout_secs: u64,
}

/// 导入触发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// 导入处理器地址
    pub processor_endpoint: String,
    pub invoke_timeout_secs: u64,
    /// 上传事件过滤器，逐个独立求值
    pub filters: Vec<IngestFilter>,
    /// 监视的对象键前缀
    pub watch_prefix: String,
    /// 监视轮询间隔（秒）
    pub poll_interval_secs: u64,
}

/// 初始化引导配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub enabled: bool,
    /// 引导状态标记文件位置（部署生命周期内持久）
    pub state_path: String,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub rules: Vec<RouteRule>,
    /// 目标标识 -> 后端基址
    pub targets: HashMap<String, String>,
}

/// 任务生产配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// 队列可见消息达到该值时跳过本轮生产
    pub busy_threshold: usize,
    /// 每轮取出的IP段数
    pub range_limit: usize,
    pub ranges: Vec<IpRange>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            queue: QueueConfig::default(),
            probe: ProbeConfig {
                agent_endpoint: "http://localhost:9100".to_string(),
                timeout_secs: 900,
            },
            ingest: IngestConfig {
                processor_endpoint: "http://localhost:9200".to_string(),
                invoke_timeout_secs: 900,
                filters: vec![
                    IngestFilter {
                        prefix: "import-sql/".to_string(),
                        suffix: ".sql".to_string(),
                    },
                    IngestFilter {
                        prefix: "import-sql/".to_string(),
                        suffix: ".zip".to_string(),
                    },
                ],
                watch_prefix: "import-sql/".to_string(),
                poll_interval_secs: 60,
            },
            bootstrap: BootstrapConfig {
                enabled: true,
                state_path: "/var/lib/cloudperf/bootstrap.state".to_string(),
            },
            storage: StorageConfig {
                endpoint: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "cloudperf-data".to_string(),
            },
            router: RouterConfig {
                rules: vec![
                    RouteRule {
                        path_pattern: "/job*".to_string(),
                        priority: 10,
                        target: "api".to_string(),
                    },
                    RouteRule {
                        path_pattern: "*".to_string(),
                        priority: u32::MAX,
                        target: "web".to_string(),
                    },
                ],
                targets: HashMap::from([
                    ("api".to_string(), "http://localhost:9300".to_string()),
                    ("web".to_string(), "http://localhost:9400".to_string()),
                ]),
            },
            producer: ProducerConfig {
                enabled: true,
                interval_secs: 60,
                busy_threshold: 100,
                range_limit: 2,
                ranges: Vec::new(),
            },
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            max_batching_window_secs: 300,
            max_concurrency: 10,
            visibility_timeout_secs: 3600,
            max_receive_count: 5,
            sweep_interval_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 || self.batch_size > 10 {
            return Err("批次大小应在1-10之间".into());
        }
        if self.max_concurrency == 0 || self.max_concurrency > 1000 {
            return Err("并发上限应在1-1000之间".into());
        }
        if self.visibility_timeout_secs < 60 {
            return Err("可见性超时不应少于1分钟".into());
        }
        if self.visibility_timeout_secs <= self.max_batching_window_secs {
            return Err("可见性超时必须大于批次聚合窗口".into());
        }
        if self.max_receive_count == 0 {
            return Err("投递次数上限不能为0".into());
        }
        if self.sweep_interval_secs == 0 {
            return Err("租约收割间隔不能为0".into());
        }
        Ok(())
    }
}

impl Config {
    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| AppError::config(format!("解析配置文件失败: {}", e)))?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(AppError::config("服务器端口不能为0"));
        }

        if let Err(e) = self.queue.validate() {
            return Err(AppError::config(format!("队列配置无效: {}", e)));
        }

        if self.probe.agent_endpoint.is_empty() {
            return Err(AppError::config("探测代理地址不能为空"));
        }

        if self.ingest.processor_endpoint.is_empty() {
            return Err(AppError::config("导入处理器地址不能为空"));
        }
        if self.ingest.poll_interval_secs == 0 {
            return Err(AppError::config("监视轮询间隔不能为0"));
        }

        if self.bootstrap.enabled && self.bootstrap.state_path.is_empty() {
            return Err(AppError::config("引导状态文件路径不能为空"));
        }

        if self.storage.endpoint.is_empty() {
            return Err(AppError::config("对象存储endpoint不能为空"));
        }
        if self.storage.bucket.is_empty() {
            return Err(AppError::config("对象存储bucket不能为空"));
        }

        // 缺少默认路由属于启动期配置错误
        if !self.router.rules.iter().any(|r| r.is_catch_all()) {
            return Err(AppError::config("路由规则表缺少默认规则（path_pattern = \"*\"）"));
        }

        if self.producer.enabled {
            if self.producer.interval_secs == 0 {
                return Err(AppError::config("生产间隔不能为0"));
            }
            if self.producer.range_limit == 0 {
                return Err(AppError::config("每轮IP段数不能为0"));
            }
        }

        Ok(())
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queue.batch_size, 2);
        assert_eq!(config.queue.max_batching_window_secs, 300);
        assert_eq!(config.queue.max_concurrency, 10);
        assert_eq!(config.queue.visibility_timeout_secs, 3600);
        assert_eq!(config.queue.max_receive_count, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.queue.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_visibility_timeout_must_exceed_batching_window() {
        let mut config = Config::default();
        config.queue.max_batching_window_secs = config.queue.visibility_timeout_secs;
        assert!(config.validate().is_err());

        config.queue.max_batching_window_secs = config.queue.visibility_timeout_secs - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_default_route_rejected() {
        let mut config = Config::default();
        config.router.rules.retain(|r| !r.is_catch_all());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_addr() {
        let config = Config::default();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_save_and_load_config() {
        let original_config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        // 保存配置
        original_config.save_to_file(temp_file.path()).unwrap();

        // 加载配置
        let loaded_config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(
            original_config.queue.batch_size,
            loaded_config.queue.batch_size
        );
        assert_eq!(
            original_config.router.rules.len(),
            loaded_config.router.rules.len()
        );
    }
}
