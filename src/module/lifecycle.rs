//! 加载状态表
//!
//! 记录每个模块在本次启动周期中的加载结果，并为 `await_module_loaded` 提供等待点。
//!
//! - 每个模块的结果只记录一次，之后的记录被忽略
//! - 启动周期完成时写入哨兵键 [`ALL_MODULES_KEY`]，并拒绝所有仍在等待的查询
//! - 完成之后查询未知模块立即失败，不会永久挂起

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::metadata::LoadState;
use crate::utils::{CoreError, Result};

/// 哨兵键：所有模块都已结束加载尝试
pub const ALL_MODULES_KEY: &str = "__init_all__";

#[derive(Default)]
struct StateTable {
    /// 模块名 -> 是否加载成功
    states: HashMap<String, bool>,
    /// 模块名 -> 等待者
    waiters: HashMap<String, Vec<oneshot::Sender<bool>>>,
    /// 启动周期是否已结束
    complete: bool,
}

/// 加载状态表
///
/// 克隆共享同一份状态。只有加载协调器会写入，模块和外部协作者只读取。
#[derive(Clone, Default)]
pub struct LoadStateRegistry {
    inner: Arc<Mutex<StateTable>>,
}

impl LoadStateRegistry {
    /// 创建空的状态表
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录模块加载结果
    ///
    /// 返回是否写入成功；同一模块第二次记录会被忽略。
    pub async fn record(&self, name: &str, loaded: bool) -> bool {
        let waiters = {
            let mut table = self.inner.lock().await;
            if let Some(previous) = table.states.get(name) {
                warn!(module_id = %name, previous = *previous, loaded, "加载状态已记录，忽略重复记录");
                return false;
            }
            table.states.insert(name.to_string(), loaded);
            table.waiters.remove(name).unwrap_or_default()
        };

        debug!(module_id = %name, loaded, waiters = waiters.len(), "记录加载状态");
        for waiter in waiters {
            let _ = waiter.send(loaded);
        }
        true
    }

    /// 查询模块当前状态
    pub async fn state(&self, name: &str) -> LoadState {
        match self.inner.lock().await.states.get(name) {
            Some(true) => LoadState::Ready,
            Some(false) => LoadState::Failed,
            None => LoadState::Pending,
        }
    }

    /// 启动周期是否已结束
    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.complete
    }

    /// 等待模块加载完成
    ///
    /// - 已就绪：立即返回 `Ok`
    /// - 已失败：立即返回 `ModuleNotLoaded`
    /// - 尚未记录：等待记录；启动周期结束时仍未就绪则返回 `ModuleNotLoaded`
    pub async fn await_module_loaded(&self, name: &str) -> Result<()> {
        let receiver = {
            let mut table = self.inner.lock().await;
            match table.states.get(name) {
                Some(true) => return Ok(()),
                Some(false) => return Err(CoreError::ModuleNotLoaded(name.to_string())),
                None if table.complete => {
                    return Err(CoreError::ModuleNotLoaded(name.to_string()));
                }
                None => {}
            }
            let (tx, rx) = oneshot::channel();
            table.waiters.entry(name.to_string()).or_default().push(tx);
            rx
        };

        match receiver.await {
            Ok(true) => Ok(()),
            _ => Err(CoreError::ModuleNotLoaded(name.to_string())),
        }
    }

    /// 结束启动周期
    ///
    /// 写入哨兵键，并拒绝所有仍在等待的非哨兵查询。重复调用无效果。
    pub async fn complete(&self) {
        self.finish(true).await;
    }

    /// 以失败结束启动周期
    ///
    /// 用于依赖图结构错误：哨兵键记为失败，所有等待者都被拒绝。
    pub async fn abort(&self) {
        self.finish(false).await;
    }

    async fn finish(&self, success: bool) {
        let waiters = {
            let mut table = self.inner.lock().await;
            if table.complete {
                return;
            }
            table.complete = true;
            table.states.entry(ALL_MODULES_KEY.to_string()).or_insert(success);
            std::mem::take(&mut table.waiters)
        };

        let mut rejected = 0usize;
        for (name, senders) in waiters {
            let loaded = success && name == ALL_MODULES_KEY;
            if !loaded {
                rejected += senders.len();
            }
            for sender in senders {
                let _ = sender.send(loaded);
            }
        }

        info!(success, rejected, "启动周期结束");
    }

    /// 状态快照（不含哨兵键）
    pub async fn snapshot(&self) -> BTreeMap<String, bool> {
        self.inner
            .lock()
            .await
            .states
            .iter()
            .filter(|(name, _)| name.as_str() != ALL_MODULES_KEY)
            .map(|(name, loaded)| (name.clone(), *loaded))
            .collect()
    }
}

impl std::fmt::Debug for LoadStateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadStateRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_is_terminal() {
        let states = LoadStateRegistry::new();
        assert_eq!(states.state("a").await, LoadState::Pending);

        assert!(states.record("a", true).await);
        assert!(!states.record("a", false).await);
        assert_eq!(states.state("a").await, LoadState::Ready);
    }

    #[tokio::test]
    async fn test_await_resolves_on_record() {
        let states = LoadStateRegistry::new();
        let waiter = {
            let states = states.clone();
            tokio::spawn(async move { states.await_module_loaded("a").await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        states.record("a", true).await;
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_await_failed_module() {
        let states = LoadStateRegistry::new();
        states.record("a", false).await;
        let err = states.await_module_loaded("a").await.unwrap_err();
        assert!(matches!(err, CoreError::ModuleNotLoaded(ref n) if n == "a"));
    }

    #[tokio::test]
    async fn test_complete_rejects_pending_waiters() {
        let states = LoadStateRegistry::new();
        let waiter = {
            let states = states.clone();
            tokio::spawn(async move { states.await_module_loaded("never").await })
        };
        let all = {
            let states = states.clone();
            tokio::spawn(async move { states.await_module_loaded(ALL_MODULES_KEY).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        states.complete().await;

        assert!(waiter.await.unwrap().is_err());
        assert!(all.await.unwrap().is_ok());
        assert!(states.is_complete().await);

        // 结束之后的未知模块立即失败
        assert!(states.await_module_loaded("late").await.is_err());
        assert!(states.await_module_loaded(ALL_MODULES_KEY).await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_marks_sentinel_failed() {
        let states = LoadStateRegistry::new();
        states.abort().await;
        assert_eq!(states.state(ALL_MODULES_KEY).await, LoadState::Failed);
        assert!(states.snapshot().await.is_empty());
    }
}
