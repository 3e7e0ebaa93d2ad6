//! 模块元数据定义
//!
//! 每个功能模块都要提供的静态声明和生命周期钩子：
//!
//! - [`ModuleDeclaration`] - 模块名和依赖，可以直接从 YAML/JSON 清单加载
//! - [`ModuleDescriptor`] - 声明加上暴露给其他模块的方法表
//! - [`FeatureModule`] - 模块实现的 trait，钩子都有默认空实现
//! - [`LoadState`] - 模块在一次启动周期中的加载状态

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::ModuleContext;
use crate::router::method::ExposedMethods;
use crate::utils::{CoreError, Result};

/// 模块声明
///
/// ```rust
/// use chips_loader::module::metadata::ModuleDeclaration;
///
/// let yaml = "name: statusbar\ndeps: [tabs]\nsoft: [sidebar]\n";
/// let decl: ModuleDeclaration = serde_yaml::from_str(yaml).unwrap();
/// assert_eq!(decl.dependencies, vec!["tabs"]);
/// assert_eq!(decl.soft_dependencies, vec!["sidebar"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    /// 模块名，在一次加载的模块集合中唯一
    pub name: String,

    /// 硬依赖：缺失或成环时整个启动周期失败
    #[serde(default, alias = "deps")]
    pub dependencies: Vec<String>,

    /// 软依赖：缺失时调用降级，从不导致失败
    #[serde(default, alias = "soft")]
    pub soft_dependencies: Vec<String>,
}

impl ModuleDeclaration {
    /// 创建没有依赖的声明
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 添加硬依赖
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// 添加软依赖
    pub fn with_soft_dependency(mut self, name: impl Into<String>) -> Self {
        self.soft_dependencies.push(name.into());
        self
    }

    /// 校验声明本身
    ///
    /// 自依赖不在这里检查，它会在依赖解析时作为环报告。
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidMetadata("模块名不能为空".to_string()));
        }
        let mut all_deps = self.dependencies.iter().chain(&self.soft_dependencies);
        if all_deps.any(|d| d.trim().is_empty()) {
            return Err(CoreError::InvalidMetadata(format!(
                "模块 '{}' 声明了空的依赖名",
                self.name
            )));
        }
        Ok(())
    }
}

impl AsRef<ModuleDeclaration> for ModuleDeclaration {
    fn as_ref(&self) -> &ModuleDeclaration {
        self
    }
}

/// 模块描述
///
/// 工厂产出的模块通过 [`FeatureModule::descriptor`] 返回它。
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptor {
    /// 声明
    pub declaration: ModuleDeclaration,

    /// 注册到 RPC 注册表的方法
    pub exposed_methods: ExposedMethods,

    /// 注册到事件注册表的方法
    pub event_methods: ExposedMethods,
}

impl ModuleDescriptor {
    /// 创建描述
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_declaration(ModuleDeclaration::new(name))
    }

    /// 从声明创建
    pub fn from_declaration(declaration: ModuleDeclaration) -> Self {
        Self {
            declaration,
            ..Default::default()
        }
    }

    /// 模块没有提供描述时使用的降级描述：名称取目录键，没有依赖也没有方法
    pub fn fallback(key: impl Into<String>) -> Self {
        Self::new(key)
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    /// 添加硬依赖
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.declaration.dependencies.push(name.into());
        self
    }

    /// 添加软依赖
    pub fn with_soft_dependency(mut self, name: impl Into<String>) -> Self {
        self.declaration.soft_dependencies.push(name.into());
        self
    }

    /// 设置 RPC 方法表
    pub fn with_exposed_methods(mut self, methods: ExposedMethods) -> Self {
        self.exposed_methods = methods;
        self
    }

    /// 设置事件方法表
    pub fn with_event_methods(mut self, methods: ExposedMethods) -> Self {
        self.event_methods = methods;
        self
    }
}

impl AsRef<ModuleDeclaration> for ModuleDescriptor {
    fn as_ref(&self) -> &ModuleDeclaration {
        &self.declaration
    }
}

/// 模块加载状态
///
/// `Pending` 只能转换到 `Ready` 或 `Failed`，后两者都是终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// 尚未完成加载
    Pending,
    /// 初始化成功
    Ready,
    /// 加载或初始化失败
    Failed,
}

impl LoadState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadState::Pending)
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadState::Pending => "pending",
            LoadState::Ready => "ready",
            LoadState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 功能模块 trait
///
/// 钩子按以下顺序被调用，任何一个返回错误都会让模块进入 `Failed`：
///
/// 1. [`init_before_session_store_init`](Self::init_before_session_store_init) - 宿主就绪前，按拓扑序依次调用
/// 2. [`init`](Self::init) - 宿主就绪后，所有硬依赖都已就绪
/// 3. [`construct_default`](Self::construct_default) - `init` 成功之后
#[async_trait]
pub trait FeatureModule: Send + Sync {
    /// 模块描述，返回 `None` 时使用 [`ModuleDescriptor::fallback`]
    fn descriptor(&self) -> Option<ModuleDescriptor> {
        None
    }

    /// 宿主就绪前的初始化
    async fn init_before_session_store_init(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// 主初始化
    async fn init(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }

    /// 构造默认导出
    async fn construct_default(&self, _ctx: &ModuleContext) -> Result<()> {
        Ok(())
    }
}
