//! 调用注册表
//!
//! 模块间调用的分发中心。模块把方法表注册到这里，其他模块通过模块名和方法名调用，
//! 互相之间不持有直接引用。
//!
//! 同一份实现有两个独立实例：RPC 注册表和事件注册表（[`RegistryKind`]），
//! 各自的方法表和挂起队列互不可见，只有日志标签不同。
//!
//! # 调用语义
//!
//! - 目标已注册：直接执行方法；方法不存在立即返回 `MethodNotFound`
//! - 目标未注册：调用挂起，目标注册时按入队顺序重放；超时后返回 `Timeout`。
//!   重放在一个独立任务中逐个执行，注册本身不等待重放完成
//! - 等待中的调用被取消（future 被丢弃）时，挂起条目随之移除
//! - 方法返回错误或 panic：返回 `Invocation`
//!
//! 注册表状态由一把 `tokio::sync::Mutex` 保护，执行方法时从不持有该锁。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::method::ExposedMethods;
use super::proxy::{ModuleInstance, ModuleProxy, SoftModuleProxy};
use super::queue::{PendingCall, PendingQueue};
use crate::core::config::{RegistryConfig, ReplacePolicy};
use crate::utils::{generate_id, CoreError, Result};

/// 注册表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    /// RPC 注册表
    Rpc,
    /// 事件注册表
    Event,
}

impl RegistryKind {
    /// 日志标签
    pub fn label(&self) -> &'static str {
        match self {
            RegistryKind::Rpc => "rpc",
            RegistryKind::Event => "event",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Default)]
struct RegistryState {
    /// 模块名 -> 方法表
    modules: HashMap<String, Arc<ExposedMethods>>,
    /// 挂起调用
    pending: PendingQueue,
}

struct RegistryInner {
    kind: RegistryKind,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

/// 调用注册表
///
/// 克隆开销很小，所有克隆共享同一份状态。
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<RegistryInner>,
}

impl CallRegistry {
    /// 创建注册表
    pub fn new(kind: RegistryKind, config: RegistryConfig) -> Self {
        debug!(
            registry = kind.label(),
            call_timeout_ms = config.call_timeout_ms,
            replace_policy = ?config.replace_policy,
            "创建调用注册表"
        );
        Self {
            inner: Arc::new(RegistryInner {
                kind,
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// 使用默认配置创建 RPC 注册表
    pub fn rpc() -> Self {
        Self::new(RegistryKind::Rpc, RegistryConfig::default())
    }

    /// 使用默认配置创建事件注册表
    pub fn event() -> Self {
        Self::new(RegistryKind::Event, RegistryConfig::default())
    }

    /// 注册表类型
    pub fn kind(&self) -> RegistryKind {
        self.inner.kind
    }

    /// 挂起调用超时时长
    pub fn call_timeout(&self) -> Duration {
        self.inner.config.call_timeout()
    }

    /// 注册模块方法表
    ///
    /// 注册后立即按入队顺序重放该模块的所有挂起调用。
    ///
    /// # 错误
    ///
    /// - `CoreError::InvalidMetadata` - 模块名或方法名为空
    /// - `CoreError::ModuleAlreadyRegistered` - 已注册且策略为 `Reject`
    pub async fn register_module(
        &self,
        name: impl Into<String>,
        methods: ExposedMethods,
    ) -> Result<()> {
        let name = name.into();
        methods.validate(&name)?;
        let label = self.inner.kind.label();
        let methods = Arc::new(methods);

        let pending = {
            let mut state = self.inner.state.lock().await;
            if state.modules.contains_key(&name) {
                match self.inner.config.replace_policy {
                    ReplacePolicy::Reject => {
                        warn!(registry = label, module_id = %name, "模块已注册，拒绝替换");
                        return Err(CoreError::ModuleAlreadyRegistered(name));
                    }
                    ReplacePolicy::Warn => {
                        warn!(registry = label, module_id = %name, "模块已注册，替换旧的方法表");
                    }
                }
            }
            state.modules.insert(name.clone(), Arc::clone(&methods));
            state.pending.drain(&name)
        };

        info!(
            registry = label,
            module_id = %name,
            method_count = methods.len(),
            pending = pending.len(),
            "模块已注册"
        );

        if !pending.is_empty() {
            tokio::spawn(Self::replay(label, name, methods, pending));
        }

        Ok(())
    }

    /// 按入队顺序逐个执行挂起调用，每个调用的结果单独交回等待方
    async fn replay(
        label: &'static str,
        target: String,
        methods: Arc<ExposedMethods>,
        pending: VecDeque<PendingCall>,
    ) {
        for mut call in pending {
            let id = call.id.clone();
            if call.is_abandoned() {
                debug!(registry = label, module_id = %target, call_id = %id, "调用方已放弃，跳过");
                continue;
            }

            let waited_ms = call.wait_time_ms();
            let method = call.method.clone();
            let args = call.take_args();
            let result = Self::dispatch(&methods, &target, &method, args).await;

            if call.settle(result) {
                debug!(registry = label, module_id = %target, call_id = %id, method = %method, waited_ms, "重放挂起调用");
            } else {
                debug!(registry = label, module_id = %target, call_id = %id, "调用方已放弃，丢弃结果");
            }
        }
    }

    /// 注销模块
    ///
    /// 正在执行的调用不受影响，之后的调用进入挂起路径。返回模块此前是否已注册。
    pub async fn unregister_module(&self, name: &str) -> bool {
        let removed = self.inner.state.lock().await.modules.remove(name).is_some();
        if removed {
            info!(registry = self.inner.kind.label(), module_id = %name, "模块已注销");
        }
        removed
    }

    /// 模块是否已注册
    pub async fn is_module_registered(&self, name: &str) -> bool {
        self.inner.state.lock().await.modules.contains_key(name)
    }

    /// 已注册模块名（字典序）
    pub async fn registered_modules(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut names: Vec<String> = state.modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// 目标模块的挂起调用数量
    pub async fn pending_count(&self, target: &str) -> usize {
        let mut state = self.inner.state.lock().await;
        state.pending.prune();
        state.pending.len_for(target)
    }

    /// 调用模块方法
    ///
    /// 目标未注册时挂起，直到目标注册或超时。
    #[instrument(skip(self, args), fields(registry = self.inner.kind.label()))]
    pub async fn call(&self, target: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let (id, receiver) = {
            let mut state = self.inner.state.lock().await;
            if let Some(methods) = state.modules.get(target) {
                let methods = Arc::clone(methods);
                drop(state);
                return Self::dispatch(&methods, target, method, args).await;
            }

            let id = generate_id();
            let (call, receiver) = PendingCall::new(id.clone(), target, method, args);
            state.pending.push(call);
            (id, receiver)
        };

        let mut guard = PendingGuard {
            inner: self.inner.as_ref(),
            target,
            id: id.clone(),
            armed: true,
        };
        debug!(call_id = %id, "目标模块未注册，调用挂起");

        let outcome = tokio::time::timeout(self.call_timeout(), receiver).await;
        guard.armed = false;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::Internal(format!(
                "挂起调用 '{}.{}' 的唤醒通道已关闭",
                target, method
            ))),
            Err(_) => {
                self.inner.state.lock().await.pending.remove(target, &id);
                let timeout_ms = self.inner.config.call_timeout_ms;
                warn!(call_id = %id, timeout_ms, "等待目标模块注册超时");
                Err(CoreError::Timeout {
                    module: target.to_string(),
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// 尝试调用模块方法
    ///
    /// 与 [`call`](Self::call) 相同，但从不返回错误：任何失败都记录在 debug 级别并返回 `None`。
    pub async fn try_call(&self, target: &str, method: &str, args: Vec<Value>) -> Option<Value> {
        match self.call(target, method, args).await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    registry = self.inner.kind.label(),
                    target = %target,
                    method = %method,
                    error = %e,
                    "软调用失败，降级为 None"
                );
                None
            }
        }
    }

    /// 获取目标模块的硬代理
    pub fn get_proxy(&self, target: impl Into<String>) -> ModuleProxy {
        ModuleProxy::new(self.clone(), target)
    }

    /// 获取目标模块的软代理
    pub fn get_soft_proxy(&self, target: impl Into<String>) -> SoftModuleProxy {
        SoftModuleProxy::new(self.clone(), target)
    }

    /// 获取模块实例视图
    ///
    /// 已注册时返回当前方法表的快照；未注册时返回软视图，任何方法都返回 `Ok(Value::Null)`。
    pub async fn get_instance(&self, name: &str) -> ModuleInstance {
        let state = self.inner.state.lock().await;
        match state.modules.get(name) {
            Some(methods) => ModuleInstance::Registered {
                name: name.to_string(),
                methods: Arc::clone(methods),
            },
            None => {
                warn!(registry = self.inner.kind.label(), module_id = %name, "模块未注册，返回软实例");
                ModuleInstance::Missing {
                    name: name.to_string(),
                }
            }
        }
    }

    pub(crate) async fn dispatch(
        methods: &ExposedMethods,
        target: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        match methods.get(method) {
            Some(m) => m.invoke(target, method, args).await,
            None => Err(CoreError::MethodNotFound {
                module: target.to_string(),
                method: method.to_string(),
            }),
        }
    }
}

/// 等待中的调用被取消时把挂起条目移出队列
struct PendingGuard<'a> {
    inner: &'a RegistryInner,
    target: &'a str,
    id: String,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // 拿不到锁时由下一次入队或计数清理
        if let Ok(mut state) = self.inner.state.try_lock() {
            state.pending.remove(self.target, &self.id);
        }
    }
}

impl fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRegistry")
            .field("kind", &self.inner.kind)
            .field("call_timeout_ms", &self.inner.config.call_timeout_ms)
            .field("replace_policy", &self.inner.config.replace_policy)
            .finish()
    }
}
