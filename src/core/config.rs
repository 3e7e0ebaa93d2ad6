//! 加载器配置
//!
//! 定义加载器的配置结构和加载逻辑。配置文件可以是 YAML 或 JSON。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{CoreError, Result};

/// 重复注册策略
///
/// 同名模块再次注册时的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// 记录警告并替换（开发期热重载单个模块时使用）
    #[default]
    Warn,
    /// 拒绝替换，返回 `CoreError::ModuleAlreadyRegistered`
    Reject,
}

/// 调用注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// 挂起调用等待目标模块注册的超时时间（毫秒）
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// 重复注册策略
    #[serde(default)]
    pub replace_policy: ReplacePolicy,
}

fn default_call_timeout_ms() -> u64 {
    5000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            replace_policy: ReplacePolicy::default(),
        }
    }
}

impl RegistryConfig {
    /// 挂起调用超时时长
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 已启用模块偏好文件（JSON: 分类 -> 模块名列表）
    ///
    /// 未设置时所有目录中的模块都被启用。
    #[serde(default)]
    pub enabled_pref_path: Option<PathBuf>,
}

/// 加载器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 调用注册表配置
    #[serde(default)]
    pub registry: RegistryConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl LoaderConfig {
    /// 创建配置构建器
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// `.json` 后缀按 JSON 解析，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("无法读取配置文件 {:?}: {}", path, e))
        })?;

        let mut config: LoaderConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置值
    pub fn validate(&self) -> Result<()> {
        if self.registry.call_timeout_ms == 0 {
            return Err(CoreError::InvalidConfigValue {
                key: "registry.call_timeout_ms".to_string(),
                reason: "超时时间必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    ///
    /// 只覆盖与默认值不同的项。
    pub fn merge(&mut self, other: LoaderConfig) {
        if other.registry.call_timeout_ms != default_call_timeout_ms() {
            self.registry.call_timeout_ms = other.registry.call_timeout_ms;
        }
        if other.registry.replace_policy != ReplacePolicy::default() {
            self.registry.replace_policy = other.registry.replace_policy;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.modules.enabled_pref_path.is_some() {
            self.modules.enabled_pref_path = other.modules.enabled_pref_path;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置挂起调用超时（毫秒）
    pub fn call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.registry.call_timeout_ms = timeout_ms;
        self
    }

    /// 设置重复注册策略
    pub fn replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.config.registry.replace_policy = policy;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 设置已启用模块偏好文件
    pub fn enabled_pref_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules.enabled_pref_path = Some(path.into());
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}
