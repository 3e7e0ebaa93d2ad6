//! 薯片模块加载器错误类型定义
//!
//! 本模块定义了加载器中使用的所有错误类型。

use thiserror::Error;

/// 加载器核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 调用分发错误 ====================

    /// 目标模块未注册
    #[error("目标模块未注册: '{0}'")]
    ModuleNotFound(String),

    /// 目标模块上不存在该方法
    #[error("方法未找到: 模块 '{module}' 没有方法 '{method}'")]
    MethodNotFound {
        module: String,
        method: String,
    },

    /// 等待目标模块注册超时
    #[error("调用超时: 模块 '{module}' 在 {timeout_ms}ms 内未注册 (方法 '{method}')")]
    Timeout {
        module: String,
        method: String,
        timeout_ms: u64,
    },

    /// 被调用的方法本身执行失败
    #[error("方法执行失败: '{module}.{method}' - {reason}")]
    Invocation {
        module: String,
        method: String,
        reason: String,
    },

    /// 模块已注册（拒绝替换策略下）
    #[error("模块已注册: '{0}'")]
    ModuleAlreadyRegistered(String),

    // ==================== 模块管理错误 ====================

    /// 模块工厂执行失败
    #[error("模块加载失败: '{module_id}' - {reason}")]
    FactoryFailed {
        module_id: String,
        reason: String,
    },

    /// 模块初始化钩子失败
    #[error("模块初始化失败: '{module_id}' - {reason}")]
    ModuleInitFailed {
        module_id: String,
        reason: String,
    },

    /// 模块未能进入就绪状态
    #[error("模块未加载: '{0}'")]
    ModuleNotLoaded(String),

    /// 必需依赖缺失
    #[error("依赖模块未找到: '{dependency}' (被 '{module}' 依赖)")]
    MissingDependency {
        module: String,
        dependency: String,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    /// 无效的模块元数据
    #[error("无效的模块元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 加载器操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误码常量
pub mod error_code {
    // 调用分发错误 (RPC-xxx)
    pub const RPC_MODULE_NOT_FOUND: &str = "RPC-001";
    pub const RPC_METHOD_NOT_FOUND: &str = "RPC-002";
    pub const RPC_TIMEOUT: &str = "RPC-003";
    pub const RPC_INVOCATION_FAILED: &str = "RPC-004";
    pub const RPC_ALREADY_REGISTERED: &str = "RPC-005";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_LOADED: &str = "MODULE-001";
    pub const MODULE_FACTORY_FAILED: &str = "MODULE-002";
    pub const MODULE_INIT_FAILED: &str = "MODULE-003";
    pub const MODULE_MISSING_DEPENDENCY: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-006";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::RPC_MODULE_NOT_FOUND,
            CoreError::MethodNotFound { .. } => error_code::RPC_METHOD_NOT_FOUND,
            CoreError::Timeout { .. } => error_code::RPC_TIMEOUT,
            CoreError::Invocation { .. } => error_code::RPC_INVOCATION_FAILED,
            CoreError::ModuleAlreadyRegistered(_) => error_code::RPC_ALREADY_REGISTERED,
            CoreError::ModuleNotLoaded(_) => error_code::MODULE_NOT_LOADED,
            CoreError::FactoryFailed { .. } => error_code::MODULE_FACTORY_FAILED,
            CoreError::ModuleInitFailed { .. } => error_code::MODULE_INIT_FAILED,
            CoreError::MissingDependency { .. } => error_code::MODULE_MISSING_DEPENDENCY,
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::InvalidMetadata(_) => error_code::MODULE_INVALID_METADATA,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            _ => "UNKNOWN",
        }
    }

    /// 是否为结构性错误（依赖图本身有问题，整个启动周期不可恢复）
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CoreError::MissingDependency { .. } | CoreError::CircularDependency(_)
        )
    }

    /// 是否为调用超时
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MethodNotFound {
            module: "sidebar".to_string(),
            method: "registerIcon".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("sidebar"));
        assert!(text.contains("registerIcon"));
    }

    #[test]
    fn test_error_code() {
        let err = CoreError::Timeout {
            module: "x".to_string(),
            method: "ping".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.error_code(), error_code::RPC_TIMEOUT);
        assert!(err.is_timeout());

        let err = CoreError::CircularDependency("a -> b -> a".to_string());
        assert_eq!(err.error_code(), error_code::MODULE_CIRCULAR_DEPENDENCY);
    }

    #[test]
    fn test_structural_errors() {
        let missing = CoreError::MissingDependency {
            module: "b".to_string(),
            dependency: "a".to_string(),
        };
        assert!(missing.is_structural());
        assert!(CoreError::CircularDependency("a -> a".to_string()).is_structural());
        assert!(!CoreError::ModuleNotLoaded("a".to_string()).is_structural());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }
}
