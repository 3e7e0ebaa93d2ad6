//! 挂起调用队列
//!
//! 目标模块尚未注册时，`call` 会把调用放进这里等待。每个目标模块一个 FIFO 队列；
//! 模块注册时整队取出按入队顺序重放，超时或被取消的调用按 ID 移除。
//! 调用方已放弃的条目在入队和计数时被清理。
//!
//! 队列本身不加锁，由 [`CallRegistry`](super::registry::CallRegistry) 和方法表
//! 放在同一把锁后面，保证“检查是否已注册”和“入队”是原子的。

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::utils::Result;

/// 挂起调用
///
/// 保存调用参数和结果通道。重放由注册表按入队顺序执行，结果经通道交回等待方。
pub struct PendingCall {
    /// 调用 ID（日志关联用）
    pub id: String,

    /// 目标模块名
    pub target: String,

    /// 方法名
    pub method: String,

    /// 入队时间
    pub enqueued_at: Instant,

    /// 调用参数
    args: Vec<Value>,

    /// 结果通道
    responder: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    /// 创建挂起调用，返回调用和对应的接收端
    pub fn new(
        id: impl Into<String>,
        target: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> (Self, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        let call = Self {
            id: id.into(),
            target: target.into(),
            method: method.into(),
            enqueued_at: Instant::now(),
            args,
            responder: tx,
        };
        (call, rx)
    }

    /// 获取等待时间（毫秒）
    pub fn wait_time_ms(&self) -> u64 {
        self.enqueued_at.elapsed().as_millis() as u64
    }

    /// 取出调用参数
    pub fn take_args(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.args)
    }

    /// 把结果交给等待方
    ///
    /// 等待方已放弃（超时或被取消）时返回 `false`。
    pub fn settle(self, result: Result<Value>) -> bool {
        self.responder.send(result).is_ok()
    }

    /// 等待方是否已放弃
    pub fn is_abandoned(&self) -> bool {
        self.responder.is_closed()
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("method", &self.method)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// 按目标模块分组的挂起调用队列
#[derive(Debug, Default)]
pub struct PendingQueue {
    queues: HashMap<String, VecDeque<PendingCall>>,
}

impl PendingQueue {
    /// 创建空队列
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队，同时清理该目标下调用方已放弃的条目
    pub fn push(&mut self, call: PendingCall) {
        let queue = self.queues.entry(call.target.clone()).or_default();
        queue.retain(|c| !c.is_abandoned());
        queue.push_back(call);
    }

    /// 清理所有调用方已放弃的条目，返回清理数量
    pub fn prune(&mut self) -> usize {
        let before = self.len();
        for queue in self.queues.values_mut() {
            queue.retain(|c| !c.is_abandoned());
        }
        self.queues.retain(|_, queue| !queue.is_empty());
        before - self.len()
    }

    /// 取出目标模块的全部挂起调用（保持入队顺序）
    pub fn drain(&mut self, target: &str) -> VecDeque<PendingCall> {
        self.queues.remove(target).unwrap_or_default()
    }

    /// 按 ID 移除挂起调用
    pub fn remove(&mut self, target: &str, id: &str) -> Option<PendingCall> {
        let queue = self.queues.get_mut(target)?;
        let index = queue.iter().position(|c| c.id == id)?;
        let call = queue.remove(index);
        if queue.is_empty() {
            self.queues.remove(target);
        }
        call
    }

    /// 目标模块的挂起调用数量
    pub fn len_for(&self, target: &str) -> usize {
        self.queues.get(target).map(VecDeque::len).unwrap_or(0)
    }

    /// 全部挂起调用数量
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
