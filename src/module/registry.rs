//! 模块目录与启用偏好
//!
//! - [`ModuleFactory`] - 异步模块工厂，执行时捕获 panic
//! - [`ModuleCatalogue`] - 按分类组织的工厂目录（分类 -> 模块名 -> 工厂）
//! - [`PreferenceStore`] - 已启用模块集合的来源
//!
//! 偏好格式与目录结构一致：`{ "common": ["a", "b"], "static": [] }`。
//! 偏好缺失时目录中的所有模块都被启用。

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use super::metadata::FeatureModule;
use crate::router::method::panic_message;
use crate::utils::{CoreError, Result};

/// 常用分类：通用模块
pub const CATEGORY_COMMON: &str = "common";

/// 常用分类：静态模块
pub const CATEGORY_STATIC: &str = "static";

type FactoryFn = dyn Fn() -> BoxFuture<'static, Result<Box<dyn FeatureModule>>> + Send + Sync;

/// 模块工厂
#[derive(Clone)]
pub struct ModuleFactory {
    inner: Arc<FactoryFn>,
}

impl ModuleFactory {
    /// 从异步闭包创建
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn FeatureModule>>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move || f().boxed()),
        }
    }

    /// 从构造函数创建
    pub fn from_fn<F, M>(f: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: FeatureModule + 'static,
    {
        let f = Arc::new(f);
        Self::new(move || {
            let f = Arc::clone(&f);
            async move { Ok(Box::new(f()) as Box<dyn FeatureModule>) }
        })
    }

    /// 执行工厂
    ///
    /// 工厂返回的错误和 panic 都转换为 `CoreError::FactoryFailed`。
    pub async fn produce(&self, key: &str) -> Result<Box<dyn FeatureModule>> {
        let failed = |reason: String| CoreError::FactoryFailed {
            module_id: key.to_string(),
            reason,
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.inner)())) {
            Ok(future) => future,
            Err(payload) => return Err(failed(panic_message(payload))),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(module)) => Ok(module),
            Ok(Err(e)) => Err(failed(e.to_string())),
            Err(payload) => Err(failed(panic_message(payload))),
        }
    }
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleFactory")
    }
}

/// 目录条目
#[derive(Debug, Clone)]
pub struct CatalogueEntry {
    /// 分类
    pub category: String,
    /// 模块名（目录键）
    pub name: String,
    /// 工厂
    pub factory: ModuleFactory,
}

/// 模块目录
///
/// 分类和模块都保持加入顺序，发现阶段的输入顺序因此是确定的。
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalogue {
    entries: Vec<CatalogueEntry>,
}

impl ModuleCatalogue {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块，同分类同名的条目被替换
    pub fn register(
        &mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        factory: ModuleFactory,
    ) -> &mut Self {
        let category = category.into();
        let name = name.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.category == category && e.name == name)
        {
            entry.factory = factory;
        } else {
            self.entries.push(CatalogueEntry {
                category,
                name,
                factory,
            });
        }
        self
    }

    /// 构建器风格的 [`register`](Self::register)
    pub fn with(
        mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        factory: ModuleFactory,
    ) -> Self {
        self.register(category, name, factory);
        self
    }

    /// 全部条目
    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 分类 -> 模块名列表（全部启用时的偏好值）
    pub fn keys(&self) -> EnabledModules {
        let mut keys = EnabledModules::new();
        for entry in &self.entries {
            keys.entry(entry.category.clone())
                .or_default()
                .push(entry.name.clone());
        }
        keys
    }

    /// 按偏好筛选启用的条目
    pub fn enabled<'a>(&'a self, enabled: &EnabledModules) -> Vec<&'a CatalogueEntry> {
        self.entries
            .iter()
            .filter(|e| {
                enabled
                    .get(&e.category)
                    .map(|names| names.iter().any(|n| n == &e.name))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// 已启用模块：分类 -> 模块名列表
pub type EnabledModules = BTreeMap<String, Vec<String>>;

/// 启用偏好来源
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// 读取已启用模块，`None` 表示偏好不存在
    async fn enabled_modules(&self) -> Result<Option<EnabledModules>>;
}

/// 内存中的固定偏好
#[derive(Debug, Clone, Default)]
pub struct StaticPreferences {
    enabled: Option<EnabledModules>,
}

impl StaticPreferences {
    /// 没有偏好：启用全部模块
    pub fn all() -> Self {
        Self::default()
    }

    /// 指定启用集合
    pub fn new(enabled: EnabledModules) -> Self {
        Self {
            enabled: Some(enabled),
        }
    }

    /// 构建器：启用某分类下的模块
    pub fn enable<I, S>(mut self, category: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled
            .get_or_insert_with(EnabledModules::new)
            .entry(category.into())
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl PreferenceStore for StaticPreferences {
    async fn enabled_modules(&self) -> Result<Option<EnabledModules>> {
        Ok(self.enabled.clone())
    }
}

/// JSON 文件偏好
///
/// 文件不存在视为偏好缺失；文件存在但内容无效时返回错误。
#[derive(Debug, Clone)]
pub struct JsonFilePreferences {
    path: PathBuf,
}

impl JsonFilePreferences {
    /// 创建
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 文件路径
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl PreferenceStore for JsonFilePreferences {
    async fn enabled_modules(&self) -> Result<Option<EnabledModules>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                let enabled: EnabledModules = serde_json::from_str(&content)?;
                info!(path = ?self.path, categories = enabled.len(), "读取模块启用偏好");
                Ok(Some(enabled))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "偏好文件不存在，启用全部模块");
                Ok(None)
            }
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}
