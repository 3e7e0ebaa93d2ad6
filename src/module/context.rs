//! 模块上下文
//!
//! 加载协调器在调用模块钩子时传入的上下文。模块通过它访问自己声明的依赖，
//! 不需要持有全局注册表。

use super::lifecycle::LoadStateRegistry;
use super::metadata::ModuleDeclaration;
use crate::router::proxy::DependencyProxies;
use crate::router::registry::CallRegistry;
use crate::utils::Result;

/// 模块上下文
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// 当前模块名
    pub name: String,

    /// RPC 依赖代理
    pub rpc: DependencyProxies,

    /// 事件依赖代理
    pub events: DependencyProxies,

    /// RPC 注册表
    pub rpc_registry: CallRegistry,

    /// 事件注册表
    pub event_registry: CallRegistry,

    /// 加载状态表
    pub load_states: LoadStateRegistry,
}

impl ModuleContext {
    /// 按模块声明构建上下文
    pub fn new(
        declaration: &ModuleDeclaration,
        rpc_registry: &CallRegistry,
        event_registry: &CallRegistry,
        load_states: &LoadStateRegistry,
    ) -> Self {
        Self {
            name: declaration.name.clone(),
            rpc: DependencyProxies::build(declaration, rpc_registry),
            events: DependencyProxies::build(declaration, event_registry),
            rpc_registry: rpc_registry.clone(),
            event_registry: event_registry.clone(),
            load_states: load_states.clone(),
        }
    }

    /// 等待指定模块加载完成
    pub async fn await_module_loaded(&self, name: &str) -> Result<()> {
        self.load_states.await_module_loaded(name).await
    }
}
