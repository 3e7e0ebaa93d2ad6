//! 核心模块
//!
//! 包含加载器配置。

pub mod config;

pub use config::{
    LoaderConfig, LoaderConfigBuilder, LogConfig, ModuleConfig, RegistryConfig, ReplacePolicy,
};
