//! 模块管理模块
//!
//! 包含模块管理系统的核心组件：
//! - 模块元数据与 `FeatureModule` trait
//! - 依赖图与解析器
//! - 加载状态表
//! - 模块目录与启用偏好
//! - 加载协调器

pub mod context;
pub mod dependency;
pub mod lifecycle;
pub mod loader;
pub mod metadata;
pub mod registry;

// 重导出常用类型
pub use context::ModuleContext;
pub use dependency::{DependencyGraph, DependencyResolver};
pub use lifecycle::{LoadStateRegistry, ALL_MODULES_KEY};
pub use loader::{BootPhase, BootReport, HostReady, HostReadyTrigger, LoadedModuleRecord, ModuleLoader};
pub use metadata::{FeatureModule, LoadState, ModuleDeclaration, ModuleDescriptor};
pub use registry::{
    CatalogueEntry, EnabledModules, JsonFilePreferences, ModuleCatalogue, ModuleFactory,
    PreferenceStore, StaticPreferences, CATEGORY_COMMON, CATEGORY_STATIC,
};
