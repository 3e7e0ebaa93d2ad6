//! 暴露方法
//!
//! 模块通过 [`ExposedMethods`] 声明可被其他模块调用的方法。每个方法都是
//! `Vec<Value> -> Result<Value>` 的异步函数，注册时统一包装：方法返回的错误和
//! 执行中的 panic 都会被转换为 `CoreError::Invocation`，不会向调用方抛出 panic。
//!
//! ```rust
//! use chips_loader::router::method::ExposedMethods;
//! use serde_json::json;
//!
//! let methods = ExposedMethods::new()
//!     .sync_method("ping", |_args| Ok(json!("pong")))
//!     .method("echo", |args| async move { Ok(args.into_iter().next().unwrap_or_default()) });
//!
//! assert!(methods.contains("ping"));
//! assert_eq!(methods.len(), 2);
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::utils::{CoreError, Result};

type Handler = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// 单个暴露方法
#[derive(Clone)]
pub struct ExposedMethod {
    handler: Arc<Handler>,
}

impl ExposedMethod {
    /// 从异步函数创建
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |args| f(args).boxed()),
        }
    }

    /// 从同步函数创建
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }

    /// 调用方法
    ///
    /// `module` 和 `method` 只用于构造错误信息。
    pub async fn invoke(&self, module: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let invocation_error = |reason: String| CoreError::Invocation {
            module: module.to_string(),
            method: method.to_string(),
            reason,
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(args))) {
            Ok(future) => future,
            Err(payload) => return Err(invocation_error(panic_message(payload))),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(invocation_error(e.to_string())),
            Err(payload) => Err(invocation_error(panic_message(payload))),
        }
    }
}

impl fmt::Debug for ExposedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExposedMethod")
    }
}

/// 提取 panic 信息
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic: <non-string payload>".to_string()
    }
}

/// 方法表：方法名 -> 方法
#[derive(Clone, Default)]
pub struct ExposedMethods {
    methods: BTreeMap<String, ExposedMethod>,
}

impl ExposedMethods {
    /// 创建空方法表
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加异步方法
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(name, ExposedMethod::new(f));
        self
    }

    /// 添加同步方法
    pub fn sync_method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, ExposedMethod::from_sync(f));
        self
    }

    /// 插入方法，同名方法被覆盖
    pub fn insert(&mut self, name: impl Into<String>, method: ExposedMethod) {
        self.methods.insert(name.into(), method);
    }

    /// 获取方法
    pub fn get(&self, name: &str) -> Option<&ExposedMethod> {
        self.methods.get(name)
    }

    /// 是否包含方法
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// 方法名列表（字典序）
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// 方法数量
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// 注册前校验
    pub fn validate(&self, module: &str) -> Result<()> {
        if module.trim().is_empty() {
            return Err(CoreError::InvalidMetadata("模块名不能为空".to_string()));
        }
        if self.methods.keys().any(|name| name.trim().is_empty()) {
            return Err(CoreError::InvalidMetadata(format!(
                "模块 '{}' 包含空方法名",
                module
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ExposedMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}
