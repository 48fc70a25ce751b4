//! 配置管理模块
//!
//! 支持多层配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use crate::observability::ObservabilityConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "EXPR";

/// 表达式引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单个表达式块允许的最大节点数
    pub max_nodes: usize,
    /// 最大嵌套深度
    pub max_depth: usize,
    /// 校验不可信表达式块的时间上限
    pub validation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_nodes: 4096,
            max_depth: 64,
            validation_timeout_ms: 50,
        }
    }
}

/// 规则集配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// 规则集文件路径
    pub path: Option<PathBuf>,
    /// 文件变更时自动重新加载
    pub watch: bool,
    /// 去抖窗口，避免连续写入触发多次重载
    pub debounce_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: None,
            watch: false,
            debounce_ms: 200,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub rules: RulesConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（EXPR_ 前缀，层级用双下划线，如 EXPR_ENGINE__MAX_DEPTH -> engine.max_depth）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("EXPR_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(Path::new(&config_dir), service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(
        config_dir: &Path,
        service_name: &str,
        environment: &str,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", environment)?
            .set_default("observability.service_name", service_name)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", environment))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.max_nodes, 4096);
        assert_eq!(config.engine.max_depth, 64);
        assert_eq!(config.engine.validation_timeout_ms, 50);
        assert_eq!(config.rules.debounce_ms, 200);
        assert!(config.rules.path.is_none());
        assert!(!config.rules.watch);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path(), "expr-match", "test").unwrap();

        assert_eq!(config.service_name, "expr-match");
        assert_eq!(config.environment, "test");
        assert_eq!(config.observability.service_name, "expr-match");
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[engine]\nmax_depth = 16\nmax_nodes = 100\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("production.toml"),
            "[engine]\nmax_depth = 8\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("expr-match.toml"),
            "[rules]\npath = \"rules.toml\"\nwatch = true\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path(), "expr-match", "production").unwrap();

        assert_eq!(config.engine.max_depth, 8);
        assert_eq!(config.engine.max_nodes, 100);
        assert_eq!(config.engine.validation_timeout_ms, 50);
        assert_eq!(config.rules.path, Some(PathBuf::from("rules.toml")));
        assert!(config.rules.watch);
        assert_eq!(config.environment, "production");
    }

    #[test]
    fn test_environment_override() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: 该变量只在本测试中读写
        unsafe {
            std::env::set_var("EXPR_RULES__DEBOUNCE_MS", "321");
        }

        let config = AppConfig::load_from(dir.path(), "expr-match", "test").unwrap();

        unsafe {
            std::env::remove_var("EXPR_RULES__DEBOUNCE_MS");
        }
        assert_eq!(config.rules.debounce_ms, 321);
    }
}
