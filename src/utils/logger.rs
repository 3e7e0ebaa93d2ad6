//! 日志系统
//!
//! 基于 tracing 生态初始化加载器的日志输出：
//!
//! - 控制台输出（Pretty 或 JSON）
//! - 可选的滚动文件输出（异步非阻塞写入）
//! - `RUST_LOG` 优先，其次使用配置中的级别和过滤指令
//!
//! ```rust,no_run
//! use chips_loader::utils::logger::{Logger, LoggerConfig};
//!
//! let _guard = Logger::init(LoggerConfig::default()).unwrap();
//! tracing::info!(module_id = "sidebar", "模块已就绪");
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从字符串解析，未知值按每天轮转处理
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别
    pub level: String,
    /// 是否使用 JSON 格式输出
    pub json_format: bool,
    /// 是否输出到控制台
    pub console_output: bool,
    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 日志轮转策略
    pub rotation: RotationStrategy,
    /// 额外的过滤指令（EnvFilter 格式），例如 "chips_loader::router=debug"
    pub filter_directives: Option<String>,
    /// 控制台是否启用 ANSI 颜色
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "chips-loader".to_string(),
            rotation: RotationStrategy::Daily,
            filter_directives: None,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 从加载器配置的日志段构建
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            ..Default::default()
        }
    }

    /// 设置日志级别
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// 设置过滤指令
    pub fn with_filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.filter_directives = Some(directives.into());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        if let Some(ref directives) = self.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(e) => eprintln!("忽略无效的日志过滤指令 '{}': {}", directive, e),
                }
            }
        }
        filter
    }
}

/// 日志系统守卫
///
/// 丢弃时会刷新所有挂起的非阻塞写入，必须保持到程序退出。
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统
pub struct Logger;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

impl Logger {
    /// 初始化全局日志订阅者
    ///
    /// 重复初始化返回 `CoreError::InitFailed`。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, worker) = tracing_appender::non_blocking(io::stdout());
            guard._guards.push(worker);
            layers.push(Self::fmt_layer(writer, config.json_format, config.ansi_colors));
        }

        if let Some(ref dir) = config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard._guards.push(worker);
            layers.push(Self::fmt_layer(writer, config.json_format, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(config.env_filter())
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化日志系统，失败时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn fmt_layer<W>(writer: W, json: bool, ansi: bool) -> BoxedLayer
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        if json {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(ansi)
                .boxed()
        }
    }
}
