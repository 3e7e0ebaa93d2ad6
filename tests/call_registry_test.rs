//! 调用注册表集成测试
//!
//! 覆盖直接调用、挂起重放、超时、软调用和代理。
//! 涉及超时的测试使用暂停时钟，tokio 会在空闲时自动推进时间。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chips_loader::{
    CallRegistry, CoreError, ExposedMethods, RegistryConfig, RegistryKind, ReplacePolicy,
};
use serde_json::{json, Value};
use tokio::time::Instant;

fn module_a() -> ExposedMethods {
    ExposedMethods::new()
        .sync_method("getData", |_| Ok(json!("test-data")))
        .sync_method("setData", |args| Ok(args.into_iter().next().unwrap_or_default()))
        .method("asyncMethod", |_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!("async-result"))
        })
        .sync_method("throwError", |_| {
            Err(CoreError::Internal("Intentional error".to_string()))
        })
}

fn module_b() -> ExposedMethods {
    ExposedMethods::new()
        .sync_method("ping", |_| Ok(json!("pong")))
        .sync_method("add", |args| {
            let a = args.first().and_then(Value::as_i64).unwrap_or(0);
            let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(a + b))
        })
}

/// 测试注册与注销
#[tokio::test]
async fn test_register_and_unregister() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-a", module_a()).await.unwrap();
    assert!(registry.is_module_registered("test-module-a").await);

    registry.unregister_module("test-module-a").await;
    assert!(!registry.is_module_registered("test-module-a").await);
}

/// 测试带参数的同步和异步调用
#[tokio::test]
async fn test_call_methods() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-a", module_a()).await.unwrap();
    registry.register_module("test-module-b", module_b()).await.unwrap();

    assert_eq!(
        registry.call("test-module-a", "getData", vec![]).await.unwrap(),
        json!("test-data")
    );
    assert_eq!(
        registry.call("test-module-b", "add", vec![json!(5), json!(3)]).await.unwrap(),
        json!(8)
    );
    assert_eq!(
        registry.call("test-module-a", "asyncMethod", vec![]).await.unwrap(),
        json!("async-result")
    );
    assert_eq!(
        registry.call("test-module-a", "setData", vec![json!("v")]).await.unwrap(),
        json!("v")
    );
}

/// 测试方法错误传播与软调用吞掉错误
#[tokio::test]
async fn test_method_error_propagation() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-a", module_a()).await.unwrap();

    let err = registry.call("test-module-a", "throwError", vec![]).await.unwrap_err();
    assert!(matches!(err, CoreError::Invocation { ref reason, .. } if reason.contains("Intentional error")));
    assert_eq!(err.error_code(), chips_loader::error_code::RPC_INVOCATION_FAILED);

    assert_eq!(registry.try_call("test-module-a", "throwError", vec![]).await, None);
}

/// 测试目标存在但方法不存在时立即失败（不等待超时）
#[tokio::test(start_paused = true)]
async fn test_missing_method_fails_immediately() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-b", module_b()).await.unwrap();

    let start = Instant::now();
    let err = registry.call("test-module-b", "nope", vec![]).await.unwrap_err();
    assert!(matches!(err, CoreError::MethodNotFound { .. }));
    assert_eq!(start.elapsed(), Duration::ZERO);
}

/// 测试挂起调用在目标注册后被重放
#[tokio::test(start_paused = true)]
async fn test_pending_call_replayed_on_register() {
    let registry = CallRegistry::rpc();

    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.call("X", "ping", vec![]).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.pending_count("X").await, 1);

    registry
        .register_module("X", ExposedMethods::new().sync_method("ping", |_| Ok(json!("pong"))))
        .await
        .unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), json!("pong"));
    assert_eq!(registry.pending_count("X").await, 0);
}

/// 测试从未注册的目标在 5000ms 后超时
#[tokio::test(start_paused = true)]
async fn test_call_times_out_after_default_window() {
    let registry = CallRegistry::rpc();
    assert_eq!(registry.call_timeout(), Duration::from_millis(5000));

    let start = Instant::now();
    let err = registry.call("X", "ping", vec![]).await.unwrap_err();

    match err {
        CoreError::Timeout { ref module, ref method, timeout_ms } => {
            assert_eq!(module, "X");
            assert_eq!(method, "ping");
            assert_eq!(timeout_ms, 5000);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(5000));
    assert_eq!(registry.pending_count("X").await, 0);
}

/// 测试截止时间之前注册仍然成功
#[tokio::test(start_paused = true)]
async fn test_registration_just_before_deadline() {
    let registry = CallRegistry::rpc();
    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.call("X", "ping", vec![]).await })
    };

    tokio::time::sleep(Duration::from_millis(4990)).await;
    registry
        .register_module("X", ExposedMethods::new().sync_method("ping", |_| Ok(json!("pong"))))
        .await
        .unwrap();

    assert_eq!(pending.await.unwrap().unwrap(), json!("pong"));
}

/// 测试超时之后的注册不会重放已失败的调用
#[tokio::test(start_paused = true)]
async fn test_registration_after_timeout_is_terminal() {
    let registry = CallRegistry::rpc();
    let invoked = Arc::new(AtomicUsize::new(0));

    let err = registry.call("late", "ping", vec![]).await.unwrap_err();
    assert!(err.is_timeout());

    let counter = Arc::clone(&invoked);
    registry
        .register_module(
            "late",
            ExposedMethods::new().sync_method("ping", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("pong"))
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

/// 测试软调用与硬调用在同一时刻结束
#[tokio::test(start_paused = true)]
async fn test_try_call_settles_with_call() {
    let registry = CallRegistry::rpc();
    let start = Instant::now();

    let (hard, soft) = tokio::join!(
        registry.call("ghost", "getData", vec![]),
        registry.try_call("ghost", "getData", vec![]),
    );

    assert!(hard.unwrap_err().is_timeout());
    assert_eq!(soft, None);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(5000) && elapsed < Duration::from_millis(5010));
}

/// 测试挂起调用按入队顺序重放，且互不影响
#[tokio::test(start_paused = true)]
async fn test_pending_calls_fifo_and_independent() {
    let registry = CallRegistry::rpc();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..3 {
        let registry = registry.clone();
        let method = if i == 1 { "fail" } else { "record" };
        handles.push(tokio::spawn(async move {
            registry.call("target", method, vec![json!(i)]).await
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(registry.pending_count("target").await, 3);

    let seen = Arc::clone(&order);
    registry
        .register_module(
            "target",
            ExposedMethods::new()
                .sync_method("record", move |args| {
                    let i = args.first().and_then(Value::as_i64).unwrap_or(-1);
                    seen.lock().unwrap().push(i);
                    Ok(json!(i))
                })
                .sync_method("fail", |_| Err(CoreError::Internal("bad".to_string()))),
        )
        .await
        .unwrap();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(results[0].as_ref().unwrap(), &json!(0));
    assert!(matches!(results[1], Err(CoreError::Invocation { .. })));
    assert_eq!(results[2].as_ref().unwrap(), &json!(2));
    assert_eq!(*order.lock().unwrap(), vec![0, 2]);
}

/// 测试注销后调用重新进入挂起路径
#[tokio::test(start_paused = true)]
async fn test_unregister_then_call_waits() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-b", module_b()).await.unwrap();
    registry.unregister_module("test-module-b").await;

    let pending = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.call("test-module-b", "ping", vec![]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.pending_count("test-module-b").await, 1);

    registry.register_module("test-module-b", module_b()).await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), json!("pong"));
}

/// 测试自定义超时
#[tokio::test(start_paused = true)]
async fn test_custom_timeout() {
    let config = RegistryConfig {
        call_timeout_ms: 200,
        ..RegistryConfig::default()
    };
    let registry = CallRegistry::new(RegistryKind::Event, config);

    let start = Instant::now();
    let err = registry.call("nobody", "onEvent", vec![]).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { timeout_ms: 200, .. }));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(210));
}

/// 测试硬代理和软代理
#[tokio::test(start_paused = true)]
async fn test_proxies() {
    let registry = CallRegistry::rpc();
    registry.register_module("test-module-b", module_b()).await.unwrap();

    let proxy = registry.get_proxy("test-module-b");
    assert_eq!(proxy.call("ping", vec![]).await.unwrap(), json!("pong"));
    assert_eq!(
        proxy.call("add", vec![json!(10), json!(20)]).await.unwrap(),
        json!(30)
    );

    let soft = registry.get_soft_proxy("non-existent-module");
    assert_eq!(soft.call("getData", vec![]).await, None);
}

/// 测试拒绝替换策略不影响已注册的方法表
#[tokio::test]
async fn test_reject_policy_keeps_original() {
    let config = RegistryConfig {
        replace_policy: ReplacePolicy::Reject,
        ..RegistryConfig::default()
    };
    let registry = CallRegistry::new(RegistryKind::Rpc, config);
    registry.register_module("m", module_b()).await.unwrap();

    let replacement = ExposedMethods::new().sync_method("ping", |_| Ok(json!("other")));
    assert!(registry.register_module("m", replacement).await.is_err());
    assert_eq!(registry.call("m", "ping", vec![]).await.unwrap(), json!("pong"));
}

/// 测试多个模块并存
#[tokio::test]
async fn test_multiple_modules() {
    let registry = CallRegistry::rpc();
    registry
        .register_module("module-1", ExposedMethods::new().sync_method("method1", |_| Ok(json!("result1"))))
        .await
        .unwrap();
    registry
        .register_module("module-2", ExposedMethods::new().sync_method("method2", |_| Ok(json!("result2"))))
        .await
        .unwrap();

    assert_eq!(registry.call("module-1", "method1", vec![]).await.unwrap(), json!("result1"));
    assert_eq!(registry.call("module-2", "method2", vec![]).await.unwrap(), json!("result2"));
    assert_eq!(registry.registered_modules().await, vec!["module-1", "module-2"]);
}

/// 测试被取消的挂起调用不会留在队列中
#[tokio::test(start_paused = true)]
async fn test_cancelled_pending_calls_are_removed() {
    let registry = CallRegistry::rpc();

    for i in 0..100 {
        let outcome = tokio::time::timeout(
            Duration::from_millis(1),
            registry.call("ghost", "ping", vec![json!(i)]),
        )
        .await;
        assert!(outcome.is_err());
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.pending_count("ghost").await, 0);

    // 目标后来注册时，被取消的调用不会执行
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    registry
        .register_module(
            "ghost",
            ExposedMethods::new().sync_method("ping", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("pong"))
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

/// 测试多线程运行时下挂起调用仍按入队顺序执行
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replay_order_on_multi_thread_runtime() {
    let registry = CallRegistry::rpc();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let caller = registry.clone();
        handles.push(tokio::spawn(async move {
            caller.call("late", "record", vec![json!(i)]).await
        }));
        // 等到这次调用入队后再发起下一次，保证入队顺序确定
        while registry.pending_count("late").await < i + 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let seen = Arc::clone(&order);
    registry
        .register_module(
            "late",
            ExposedMethods::new().method("record", move |args| {
                let seen = Arc::clone(&seen);
                async move {
                    let i = args.first().and_then(Value::as_i64).unwrap_or(-1);
                    seen.lock().unwrap().push(i);
                    tokio::task::yield_now().await;
                    Ok(json!(i))
                }
            }),
        )
        .await
        .unwrap();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), json!(i));
    }
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<i64>>());
}
