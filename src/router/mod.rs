//! 调用分发模块
//!
//! 包含模块间调用分发的核心组件：
//! - 暴露方法与方法表
//! - 挂起调用队列
//! - 调用注册表（RPC / 事件两个变体）
//! - 依赖代理

pub mod method;
pub mod proxy;
pub mod queue;
pub mod registry;

// 重导出常用类型
pub use method::{ExposedMethod, ExposedMethods};
pub use proxy::{DependencyProxies, ModuleInstance, ModuleProxy, SoftModuleProxy};
pub use queue::{PendingCall, PendingQueue};
pub use registry::{CallRegistry, RegistryKind};
