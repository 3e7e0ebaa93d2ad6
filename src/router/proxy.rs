//! 依赖代理
//!
//! 模块不直接持有依赖模块的引用，而是通过代理调用：
//!
//! - [`ModuleProxy`] - 硬依赖代理，错误和超时原样返回给调用方
//! - [`SoftModuleProxy`] - 软依赖代理，任何失败都降级为 `None`
//! - [`DependencyProxies`] - 按模块声明一次性构建的代理集合
//!
//! 代理是惰性的：构建时不检查目标是否已注册，每次调用时才查表。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::method::ExposedMethods;
use super::registry::CallRegistry;
use crate::module::metadata::ModuleDeclaration;
use crate::utils::Result;

/// 硬依赖代理
#[derive(Debug, Clone)]
pub struct ModuleProxy {
    registry: CallRegistry,
    target: String,
}

impl ModuleProxy {
    /// 创建代理
    pub fn new(registry: CallRegistry, target: impl Into<String>) -> Self {
        Self {
            registry,
            target: target.into(),
        }
    }

    /// 目标模块名
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 调用目标模块的方法
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.registry.call(&self.target, method, args).await
    }
}

/// 软依赖代理
#[derive(Debug, Clone)]
pub struct SoftModuleProxy {
    registry: CallRegistry,
    target: String,
}

impl SoftModuleProxy {
    /// 创建代理
    pub fn new(registry: CallRegistry, target: impl Into<String>) -> Self {
        Self {
            registry,
            target: target.into(),
        }
    }

    /// 目标模块名
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 调用目标模块的方法，失败时返回 `None`
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Option<Value> {
        self.registry.try_call(&self.target, method, args).await
    }
}

/// 模块实例视图
///
/// 由 [`CallRegistry::get_instance`] 返回。已注册的模块持有方法表快照，
/// 调用不会挂起；未注册的模块对任何方法都返回 `Ok(Value::Null)`。
#[derive(Debug, Clone)]
pub enum ModuleInstance {
    /// 已注册
    Registered {
        /// 模块名
        name: String,
        /// 方法表快照
        methods: Arc<ExposedMethods>,
    },
    /// 未注册
    Missing {
        /// 模块名
        name: String,
    },
}

impl ModuleInstance {
    /// 模块名
    pub fn name(&self) -> &str {
        match self {
            ModuleInstance::Registered { name, .. } | ModuleInstance::Missing { name } => name,
        }
    }

    /// 是否已注册
    pub fn is_registered(&self) -> bool {
        matches!(self, ModuleInstance::Registered { .. })
    }

    /// 调用方法
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        match self {
            ModuleInstance::Registered { name, methods } => {
                CallRegistry::dispatch(methods, name, method, args).await
            }
            ModuleInstance::Missing { .. } => Ok(Value::Null),
        }
    }
}

/// 依赖代理集合
///
/// 每个硬依赖一个 [`ModuleProxy`]，每个软依赖一个 [`SoftModuleProxy`]。
#[derive(Debug, Clone, Default)]
pub struct DependencyProxies {
    hard: BTreeMap<String, ModuleProxy>,
    soft: BTreeMap<String, SoftModuleProxy>,
}

impl DependencyProxies {
    /// 按模块声明构建代理集合
    pub fn build(declaration: &ModuleDeclaration, registry: &CallRegistry) -> Self {
        let hard = declaration
            .dependencies
            .iter()
            .map(|dep| (dep.clone(), registry.get_proxy(dep.clone())))
            .collect();
        let soft = declaration
            .soft_dependencies
            .iter()
            .map(|dep| (dep.clone(), registry.get_soft_proxy(dep.clone())))
            .collect();
        Self { hard, soft }
    }

    /// 获取硬依赖代理，未声明的依赖返回 `None`
    pub fn hard(&self, name: &str) -> Option<&ModuleProxy> {
        self.hard.get(name)
    }

    /// 获取软依赖代理，未声明的依赖返回 `None`
    pub fn soft(&self, name: &str) -> Option<&SoftModuleProxy> {
        self.soft.get(name)
    }

    /// 已声明的硬依赖名
    pub fn hard_names(&self) -> impl Iterator<Item = &str> {
        self.hard.keys().map(String::as_str)
    }

    /// 已声明的软依赖名
    pub fn soft_names(&self) -> impl Iterator<Item = &str> {
        self.soft.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_build_proxies() {
        let registry = CallRegistry::rpc();
        let decl = ModuleDeclaration::new("statusbar")
            .with_dependency("tabs")
            .with_soft_dependency("sidebar");

        let proxies = DependencyProxies::build(&decl, &registry);
        assert_eq!(proxies.hard_names().collect::<Vec<_>>(), vec!["tabs"]);
        assert_eq!(proxies.soft_names().collect::<Vec<_>>(), vec!["sidebar"]);
        assert!(proxies.hard("sidebar").is_none());
        assert!(proxies.soft("tabs").is_none());
    }

    #[tokio::test]
    async fn test_proxies_are_lazy() {
        let registry = CallRegistry::rpc();
        let decl = ModuleDeclaration::new("a").with_dependency("b");
        let proxies = DependencyProxies::build(&decl, &registry);

        // 代理构建之后才注册目标
        registry
            .register_module("b", ExposedMethods::new().sync_method("hi", |_| Ok(json!("hello"))))
            .await
            .unwrap();

        let b = proxies.hard("b").unwrap();
        assert_eq!(b.target(), "b");
        assert_eq!(b.call("hi", vec![]).await.unwrap(), json!("hello"));
    }

    #[tokio::test]
    async fn test_missing_instance_is_soft() {
        let registry = CallRegistry::rpc();
        let instance = registry.get_instance("ghost").await;
        assert!(!instance.is_registered());
        assert_eq!(instance.name(), "ghost");
        assert_eq!(instance.call("anything", vec![]).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_registered_instance() {
        let registry = CallRegistry::rpc();
        registry
            .register_module("x", ExposedMethods::new().sync_method("ping", |_| Ok(json!("pong"))))
            .await
            .unwrap();

        let instance = registry.get_instance("x").await;
        assert!(instance.is_registered());
        assert_eq!(instance.call("ping", vec![]).await.unwrap(), json!("pong"));
        assert!(instance.call("nope", vec![]).await.is_err());
    }
}
