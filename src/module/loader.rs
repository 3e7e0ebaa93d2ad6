//! 模块加载协调器
//!
//! 驱动一次完整的启动周期：
//!
//! ```text
//! Discovering -> Resolving -> PreSessionInit -> AwaitingHostReady -> Initializing -> Complete
//! ```
//!
//! 1. **Discovering** - 并发执行所有已启用模块的工厂，失败的模块记为 Failed 并排除
//! 2. **Resolving** - 解析依赖图；缺失依赖或循环依赖会终止整个周期。
//!    随后按拓扑序注册所有模块的 RPC 和事件方法，此时还没有任何钩子运行
//! 3. **PreSessionInit** - 按拓扑序依次调用 `init_before_session_store_init`
//! 4. **AwaitingHostReady** - 等待宿主就绪信号
//! 5. **Initializing** - 按拓扑序：等待全部硬依赖就绪，再调用 `init` 和 `construct_default`
//! 6. **Complete** - 写入哨兵键，拒绝所有仍在等待的 `await_module_loaded`
//!
//! 单个模块的失败只影响它自己（以及硬依赖它的模块），不会终止周期。
//! 钩子返回错误和钩子 panic 同样处理。
//! 失败模块已注册的方法保留在注册表中。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::context::ModuleContext;
use super::dependency::DependencyResolver;
use super::lifecycle::LoadStateRegistry;
use super::metadata::{FeatureModule, LoadState, ModuleDeclaration, ModuleDescriptor};
use super::registry::{
    JsonFilePreferences, ModuleCatalogue, PreferenceStore, StaticPreferences,
};
use crate::core::config::LoaderConfig;
use crate::router::method::panic_message;
use crate::router::registry::{CallRegistry, RegistryKind};
use crate::utils::{CoreError, Result};

/// 启动阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootPhase {
    /// 尚未启动
    Idle,
    /// 执行模块工厂
    Discovering,
    /// 解析依赖并注册方法
    Resolving,
    /// 宿主就绪前的初始化
    PreSessionInit,
    /// 等待宿主就绪
    AwaitingHostReady,
    /// 主初始化
    Initializing,
    /// 已完成
    Complete,
    /// 依赖图结构错误，周期终止
    Aborted,
}

/// 宿主就绪信号的触发端
#[derive(Debug, Clone)]
pub struct HostReadyTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl HostReadyTrigger {
    /// 通知宿主已就绪，可重复调用
    pub fn notify(&self) {
        self.tx.send_replace(true);
    }
}

/// 宿主就绪信号的等待端
#[derive(Debug, Clone)]
pub struct HostReady {
    rx: watch::Receiver<bool>,
}

impl HostReady {
    /// 创建一对触发端和等待端
    pub fn channel() -> (HostReadyTrigger, HostReady) {
        let (tx, rx) = watch::channel(false);
        (HostReadyTrigger { tx: Arc::new(tx) }, HostReady { rx })
    }

    /// 等待宿主就绪
    ///
    /// 触发端全部丢弃而从未通知时也会返回，避免启动周期永久挂起。
    pub async fn wait(mut self) {
        if self.rx.wait_for(|ready| *ready).await.is_err() {
            warn!("宿主就绪信号的触发端已丢弃，继续初始化");
        }
    }
}

/// 单个模块的加载记录
#[derive(Debug, Clone, Serialize)]
pub struct LoadedModuleRecord {
    /// 分类
    pub category: String,
    /// 最终状态
    pub state: LoadState,
    /// 工厂完成时间
    pub discovered_at: DateTime<Utc>,
    /// 进入终态的时间
    pub settled_at: Option<DateTime<Utc>>,
    /// 失败原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 启动报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootReport {
    /// 初始化顺序（拓扑序）
    pub order: Vec<String>,
    /// 模块名 -> 加载记录
    pub modules: BTreeMap<String, LoadedModuleRecord>,
}

impl BootReport {
    /// 模块状态
    pub fn state(&self, name: &str) -> Option<LoadState> {
        self.modules.get(name).map(|r| r.state)
    }

    /// 就绪的模块（按名称排序）
    pub fn ready(&self) -> Vec<&str> {
        self.with_state(LoadState::Ready)
    }

    /// 失败的模块（按名称排序）
    pub fn failed(&self) -> Vec<&str> {
        self.with_state(LoadState::Failed)
    }

    fn with_state(&self, state: LoadState) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    fn settle(&mut self, name: &str, state: LoadState, error: Option<String>) {
        if let Some(record) = self.modules.get_mut(name) {
            record.state = state;
            record.settled_at = Some(Utc::now());
            record.error = error;
        }
    }
}

/// 发现阶段产出的模块
struct DiscoveredModule {
    descriptor: ModuleDescriptor,
    instance: Box<dyn FeatureModule>,
}

impl AsRef<ModuleDeclaration> for DiscoveredModule {
    fn as_ref(&self) -> &ModuleDeclaration {
        &self.descriptor.declaration
    }
}

/// 解析后的模块
struct ActiveModule {
    descriptor: ModuleDescriptor,
    instance: Box<dyn FeatureModule>,
    context: ModuleContext,
    failed: bool,
}

/// 模块加载协调器
pub struct ModuleLoader {
    catalogue: ModuleCatalogue,
    preferences: Arc<dyn PreferenceStore>,
    rpc: CallRegistry,
    events: CallRegistry,
    load_states: LoadStateRegistry,
    phase: Arc<RwLock<BootPhase>>,
    booted: AtomicBool,
}

impl ModuleLoader {
    /// 创建协调器
    pub fn new(
        catalogue: ModuleCatalogue,
        preferences: impl PreferenceStore + 'static,
        rpc: CallRegistry,
        events: CallRegistry,
    ) -> Self {
        info!(
            catalogued = catalogue.len(),
            call_timeout_ms = rpc.call_timeout().as_millis() as u64,
            "创建模块加载协调器"
        );
        Self {
            catalogue,
            preferences: Arc::new(preferences),
            rpc,
            events,
            load_states: LoadStateRegistry::new(),
            phase: Arc::new(RwLock::new(BootPhase::Idle)),
            booted: AtomicBool::new(false),
        }
    }

    /// 按配置创建协调器
    ///
    /// 配置了偏好文件时从文件读取启用集合，否则启用全部模块。
    pub fn from_config(catalogue: ModuleCatalogue, config: &LoaderConfig) -> Self {
        let rpc = CallRegistry::new(RegistryKind::Rpc, config.registry.clone());
        let events = CallRegistry::new(RegistryKind::Event, config.registry.clone());
        match config.modules.enabled_pref_path {
            Some(ref path) => Self::new(catalogue, JsonFilePreferences::new(path), rpc, events),
            None => Self::new(catalogue, StaticPreferences::all(), rpc, events),
        }
    }

    /// RPC 注册表
    pub fn rpc_registry(&self) -> &CallRegistry {
        &self.rpc
    }

    /// 事件注册表
    pub fn event_registry(&self) -> &CallRegistry {
        &self.events
    }

    /// 加载状态表
    pub fn load_states(&self) -> &LoadStateRegistry {
        &self.load_states
    }

    /// 当前启动阶段
    pub async fn phase(&self) -> BootPhase {
        *self.phase.read().await
    }

    /// 等待模块加载完成
    pub async fn await_module_loaded(&self, name: &str) -> Result<()> {
        self.load_states.await_module_loaded(name).await
    }

    async fn enter(&self, phase: BootPhase) {
        *self.phase.write().await = phase;
        debug!(phase = ?phase, "进入启动阶段");
    }

    /// 执行启动周期
    ///
    /// 每个协调器只能执行一次。
    ///
    /// # 错误
    ///
    /// - `CoreError::InitFailed` - 重复执行
    /// - `CoreError::MissingDependency` / `CoreError::CircularDependency` - 依赖图结构错误
    /// - 读取启用偏好失败时的错误
    pub async fn boot<F>(&self, host_ready: F) -> Result<BootReport>
    where
        F: Future<Output = ()> + Send,
    {
        if self.booted.swap(true, Ordering::SeqCst) {
            return Err(CoreError::InitFailed("启动周期只能执行一次".to_string()));
        }

        info!("开始加载模块");
        let mut report = BootReport::default();

        // ==================== Discovering ====================
        self.enter(BootPhase::Discovering).await;
        let discovered = match self.discover(&mut report).await {
            Ok(discovered) => discovered,
            Err(e) => return Err(self.abort(e).await),
        };

        // ==================== Resolving ====================
        self.enter(BootPhase::Resolving).await;
        let mut modules = match self.resolve(discovered, &mut report) {
            Ok(modules) => modules,
            Err(e) => return Err(self.abort(e).await),
        };
        self.register_methods(&mut modules, &mut report).await;

        // ==================== PreSessionInit ====================
        self.enter(BootPhase::PreSessionInit).await;
        for module in modules.iter_mut().filter(|m| !m.failed) {
            let name = module.descriptor.name().to_string();
            let result = run_hook(&name, "init_before_session_store_init", async {
                module
                    .instance
                    .init_before_session_store_init(&module.context)
                    .await
            })
            .await;
            if let Err(e) = result {
                self.fail(module, &mut report, e).await;
            }
        }

        // ==================== AwaitingHostReady ====================
        self.enter(BootPhase::AwaitingHostReady).await;
        host_ready.await;
        info!("宿主已就绪，开始初始化模块");

        // ==================== Initializing ====================
        self.enter(BootPhase::Initializing).await;
        for module in modules.iter_mut().filter(|m| !m.failed) {
            match self.initialize(module).await {
                Ok(()) => {
                    let name = module.descriptor.name();
                    self.load_states.record(name, true).await;
                    report.settle(name, LoadState::Ready, None);
                    info!(module_id = %name, "模块已就绪");
                }
                Err(e) => self.fail(module, &mut report, e).await,
            }
        }

        // ==================== Complete ====================
        self.load_states.complete().await;
        self.enter(BootPhase::Complete).await;

        info!(
            ready = report.ready().len(),
            failed = report.failed().len(),
            "模块加载完成"
        );
        Ok(report)
    }

    /// 并发执行工厂
    async fn discover(&self, report: &mut BootReport) -> Result<Vec<DiscoveredModule>> {
        let enabled = match self.preferences.enabled_modules().await? {
            Some(enabled) => enabled,
            None => {
                debug!("没有启用偏好，启用全部模块");
                self.catalogue.keys()
            }
        };

        let entries = self.catalogue.enabled(&enabled);
        info!(enabled = entries.len(), "执行模块工厂");

        let results = join_all(entries.iter().map(|entry| async move {
            let result = entry.factory.produce(&entry.name).await;
            (*entry, result)
        }))
        .await;

        let mut discovered = Vec::with_capacity(results.len());
        let mut seen = HashSet::new();

        for (entry, result) in results {
            let now = Utc::now();
            let instance = match result {
                Ok(instance) => instance,
                Err(e) => {
                    error!(module_id = %entry.name, error = %e, "模块工厂执行失败");
                    self.load_states.record(&entry.name, false).await;
                    report.modules.insert(
                        entry.name.clone(),
                        LoadedModuleRecord {
                            category: entry.category.clone(),
                            state: LoadState::Failed,
                            discovered_at: now,
                            settled_at: Some(now),
                            error: Some(e.to_string()),
                        },
                    );
                    continue;
                }
            };

            if !seen.insert(entry.name.clone()) {
                error!(
                    module_id = %entry.name,
                    category = %entry.category,
                    "模块名在多个分类中重复，忽略后出现的模块"
                );
                continue;
            }

            let descriptor = std::panic::catch_unwind(AssertUnwindSafe(|| instance.descriptor()));
            let mut descriptor = match descriptor {
                Ok(descriptor) => {
                    descriptor.unwrap_or_else(|| ModuleDescriptor::fallback(&entry.name))
                }
                Err(payload) => {
                    let reason = panic_message(payload);
                    error!(module_id = %entry.name, error = %reason, "读取模块描述时 panic");
                    self.load_states.record(&entry.name, false).await;
                    report.modules.insert(
                        entry.name.clone(),
                        LoadedModuleRecord {
                            category: entry.category.clone(),
                            state: LoadState::Failed,
                            discovered_at: now,
                            settled_at: Some(now),
                            error: Some(reason),
                        },
                    );
                    continue;
                }
            };
            if descriptor.name() != entry.name {
                warn!(
                    module_id = %entry.name,
                    declared = %descriptor.name(),
                    "模块声明的名称与目录键不一致，使用目录键"
                );
                descriptor.declaration.name = entry.name.clone();
            }

            let mut record = LoadedModuleRecord {
                category: entry.category.clone(),
                state: LoadState::Pending,
                discovered_at: now,
                settled_at: None,
                error: None,
            };

            if let Err(e) = descriptor.declaration.validate() {
                error!(module_id = %entry.name, error = %e, "模块声明无效");
                self.load_states.record(&entry.name, false).await;
                record.state = LoadState::Failed;
                record.settled_at = Some(now);
                record.error = Some(e.to_string());
                report.modules.insert(entry.name.clone(), record);
                continue;
            }

            debug!(
                module_id = %entry.name,
                dependencies = ?descriptor.declaration.dependencies,
                soft_dependencies = ?descriptor.declaration.soft_dependencies,
                "模块已发现"
            );
            report.modules.insert(entry.name.clone(), record);
            discovered.push(DiscoveredModule {
                descriptor,
                instance,
            });
        }

        Ok(discovered)
    }

    /// 解析依赖并构建上下文
    fn resolve(
        &self,
        discovered: Vec<DiscoveredModule>,
        report: &mut BootReport,
    ) -> Result<Vec<ActiveModule>> {
        let order = DependencyResolver::new().resolve_names(&discovered)?;
        info!(order = ?order, "依赖解析完成");

        let mut by_name: HashMap<String, DiscoveredModule> = discovered
            .into_iter()
            .map(|m| (m.descriptor.name().to_string(), m))
            .collect();

        let modules = order
            .iter()
            .filter_map(|name| by_name.remove(name))
            .map(|m| {
                let context = ModuleContext::new(
                    &m.descriptor.declaration,
                    &self.rpc,
                    &self.events,
                    &self.load_states,
                );
                ActiveModule {
                    descriptor: m.descriptor,
                    instance: m.instance,
                    context,
                    failed: false,
                }
            })
            .collect();

        report.order = order;
        Ok(modules)
    }

    /// 按拓扑序注册方法
    async fn register_methods(&self, modules: &mut [ActiveModule], report: &mut BootReport) {
        for module in modules.iter_mut() {
            let name = module.descriptor.name().to_string();
            let rpc = self
                .rpc
                .register_module(name.clone(), module.descriptor.exposed_methods.clone())
                .await;
            let events = match rpc {
                Ok(()) => {
                    self.events
                        .register_module(name.clone(), module.descriptor.event_methods.clone())
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = events {
                self.fail(module, report, e).await;
            }
        }
    }

    /// 主初始化：等待硬依赖，调用 init 和 construct_default
    async fn initialize(&self, module: &ActiveModule) -> Result<()> {
        let name = module.descriptor.name();
        for dep in &module.descriptor.declaration.dependencies {
            self.load_states
                .await_module_loaded(dep)
                .await
                .map_err(|_| CoreError::ModuleInitFailed {
                    module_id: name.to_string(),
                    reason: format!("依赖模块 '{}' 未就绪", dep),
                })?;
        }

        run_hook(name, "init", async { module.instance.init(&module.context).await }).await?;
        run_hook(name, "construct_default", async {
            module.instance.construct_default(&module.context).await
        })
        .await
    }

    async fn fail(&self, module: &mut ActiveModule, report: &mut BootReport, err: CoreError) {
        let name = module.descriptor.name().to_string();
        error!(module_id = %name, error = %err, "模块加载失败");
        module.failed = true;
        self.load_states.record(&name, false).await;
        report.settle(&name, LoadState::Failed, Some(err.to_string()));
    }

    async fn abort(&self, err: CoreError) -> CoreError {
        error!(error = %err, "启动周期终止");
        self.load_states.abort().await;
        self.enter(BootPhase::Aborted).await;
        err
    }
}

/// 执行模块钩子，错误和 panic 都转换为 `CoreError::ModuleInitFailed`
async fn run_hook<F>(name: &str, hook: &str, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result.map_err(|e| init_error(name, e)),
        Err(payload) => Err(CoreError::ModuleInitFailed {
            module_id: name.to_string(),
            reason: format!("{} panic: {}", hook, panic_message(payload)),
        }),
    }
}

fn init_error(name: &str, err: CoreError) -> CoreError {
    match err {
        CoreError::ModuleInitFailed { .. } => err,
        other => CoreError::ModuleInitFailed {
            module_id: name.to_string(),
            reason: other.to_string(),
        },
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("catalogue", &self.catalogue)
            .field("rpc", &self.rpc)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
