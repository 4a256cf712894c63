// 请求路由：按路径模式与优先级选择后端目标
pub mod proxy;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, AppResult};

/// 路由规则
///
/// `priority` 数值越小越先求值；模式为前缀通配风格，
/// `/job*` 匹配所有以 `/job` 开头的路径，单独的 `*` 匹配一切。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteRule {
    pub path_pattern: String,
    pub priority: u32,
    pub target: String,
}

impl RouteRule {
    pub fn matches(&self, path: &str) -> bool {
        match self.path_pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == self.path_pattern,
        }
    }

    /// 无条件规则（默认路由）
    pub fn is_catch_all(&self) -> bool {
        self.path_pattern == "*"
    }
}

/// 请求路由器
///
/// 规则表在启动时固定，之后 `resolve` 是无状态的纯函数。
#[derive(Debug, Clone)]
pub struct RequestRouter {
    /// 已按优先级升序排序
    rules: Vec<RouteRule>,
    /// 目标标识 -> 后端基址
    targets: HashMap<String, String>,
}

impl RequestRouter {
    /// 构造路由器并校验配置
    ///
    /// 缺少默认规则或规则引用未知目标都是启动期配置错误。
    pub fn new(mut rules: Vec<RouteRule>, targets: HashMap<String, String>) -> AppResult<Self> {
        if rules.is_empty() {
            return Err(AppError::config("路由规则表不能为空"));
        }
        if !rules.iter().any(|r| r.is_catch_all()) {
            return Err(AppError::config("路由规则表缺少默认规则（path_pattern = \"*\"）"));
        }
        for rule in &rules {
            if !targets.contains_key(&rule.target) {
                return Err(AppError::config(format!(
                    "路由规则 {} 引用了未定义的目标: {}",
                    rule.path_pattern, rule.target
                )));
            }
        }
        rules.sort_by_key(|r| r.priority);
        Ok(Self { rules, targets })
    }

    /// 解析请求路径，返回命中的目标标识
    ///
    /// 默认规则兜底，因此永远有结果。
    pub fn resolve(&self, path: &str) -> &str {
        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(path))
            .unwrap_or_else(|| {
                // new() 已保证存在默认规则
                unreachable!("路由表缺少默认规则")
            });
        &rule.target
    }

    /// 目标标识对应的后端基址
    pub fn target_endpoint(&self, target: &str) -> Option<&str> {
        self.targets.get(target).map(|s| s.as_str())
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> HashMap<String, String> {
        HashMap::from([
            ("api".to_string(), "http://api.internal:80".to_string()),
            ("web".to_string(), "http://web.internal:80".to_string()),
        ])
    }

    fn sample_rules() -> Vec<RouteRule> {
        vec![
            RouteRule {
                path_pattern: "*".to_string(),
                priority: u32::MAX,
                target: "web".to_string(),
            },
            RouteRule {
                path_pattern: "/job*".to_string(),
                priority: 10,
                target: "api".to_string(),
            },
        ]
    }

    #[test]
    fn test_priority_resolution() {
        let router = RequestRouter::new(sample_rules(), targets()).unwrap();
        assert_eq!(router.resolve("/jobs/5"), "api");
        assert_eq!(router.resolve("/job"), "api");
        assert_eq!(router.resolve("/status"), "web");
        assert_eq!(router.resolve("/"), "web");
    }

    #[test]
    fn test_exact_pattern_without_glob() {
        let mut rules = sample_rules();
        rules.push(RouteRule {
            path_pattern: "/health".to_string(),
            priority: 5,
            target: "api".to_string(),
        });
        let router = RequestRouter::new(rules, targets()).unwrap();
        assert_eq!(router.resolve("/health"), "api");
        // 非通配模式不做前缀匹配
        assert_eq!(router.resolve("/healthz"), "web");
    }

    #[test]
    fn test_missing_default_rule_is_config_error() {
        let rules = vec![RouteRule {
            path_pattern: "/job*".to_string(),
            priority: 10,
            target: "api".to_string(),
        }];
        assert!(RequestRouter::new(rules, targets()).is_err());
    }

    #[test]
    fn test_unknown_target_is_config_error() {
        let mut rules = sample_rules();
        rules.push(RouteRule {
            path_pattern: "/admin*".to_string(),
            priority: 1,
            target: "missing".to_string(),
        });
        assert!(RequestRouter::new(rules, targets()).is_err());
    }

    #[test]
    fn test_target_endpoint_lookup() {
        let router = RequestRouter::new(sample_rules(), targets()).unwrap();
        assert_eq!(
            router.target_endpoint("api"),
            Some("http://api.internal:80")
        );
        assert_eq!(router.target_endpoint("missing"), None);
    }
}
