//! # Chips Loader - 薯片模块加载器
//!
//! 负责功能模块的生命周期和模块间调用分发：
//!
//! - **模块发现**: 按启用偏好并发执行模块工厂
//! - **依赖解析**: 校验硬依赖、检测循环依赖、给出确定的初始化顺序
//! - **分阶段初始化**: 宿主就绪前后两个阶段，单个模块失败不影响其他模块
//! - **调用分发**: 模块按名称调用彼此暴露的方法，目标未就绪时调用挂起等待
//! - **依赖代理**: 硬依赖传播错误，软依赖降级为 `None`
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_loader::{
//!     ExposedMethods, FeatureModule, LoaderConfig, ModuleCatalogue, ModuleDescriptor,
//!     ModuleFactory, ModuleLoader,
//! };
//! use serde_json::json;
//!
//! struct Tabs;
//!
//! impl FeatureModule for Tabs {
//!     fn descriptor(&self) -> Option<ModuleDescriptor> {
//!         Some(ModuleDescriptor::new("tabs").with_exposed_methods(
//!             ExposedMethods::new().sync_method("count", |_| Ok(json!(3))),
//!         ))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalogue = ModuleCatalogue::new().with("common", "tabs", ModuleFactory::from_fn(|| Tabs));
//!     let loader = ModuleLoader::from_config(catalogue, &LoaderConfig::default());
//!
//!     let report = loader.boot(async {}).await?;
//!     println!("就绪模块: {:?}", report.ready());
//!
//!     let count = loader.rpc_registry().call("tabs", "count", vec![]).await?;
//!     assert_eq!(count, json!(3));
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `router` - 调用注册表、方法表和依赖代理
//! - `module` - 模块元数据、依赖解析和加载协调
//! - `utils` - 错误类型、日志和 ID 生成
//! - `core` - 加载器配置

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod router;
pub mod utils;

// 重导出常用类型，方便使用
pub use router::{
    CallRegistry, DependencyProxies, ExposedMethod, ExposedMethods, ModuleInstance, ModuleProxy,
    RegistryKind, SoftModuleProxy,
};

pub use module::{
    BootPhase, BootReport, DependencyGraph, DependencyResolver, FeatureModule, HostReady,
    HostReadyTrigger, JsonFilePreferences, LoadState, LoadStateRegistry, ModuleCatalogue,
    ModuleContext, ModuleDeclaration, ModuleDescriptor, ModuleFactory, ModuleLoader,
    PreferenceStore, StaticPreferences, ALL_MODULES_KEY,
};

pub use utils::{error_code, generate_id, CoreError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, RotationStrategy};

pub use core::config::{
    LoaderConfig, LoaderConfigBuilder, LogConfig, ModuleConfig, RegistryConfig, ReplacePolicy,
};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
