//! 加载器配置集成测试
//!
//! 测试配置文件加载、校验、合并以及配置驱动的注册表行为

use std::time::Duration;

use chips_loader::{
    CallRegistry, CoreError, LoaderConfig, Logger, LoggerConfig, ModuleCatalogue, ModuleLoader,
    RegistryKind, ReplacePolicy, RotationStrategy,
};
use tempfile::TempDir;

/// 测试 YAML 配置文件加载
#[tokio::test]
async fn test_load_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("loader.yaml");
    tokio::fs::write(
        &path,
        r#"
registry:
  call_timeout_ms: 1500
  replace_policy: reject
logging:
  level: debug
  json_format: true
  rotation: hourly
modules:
  enabled_pref_path: /var/lib/chips/enabled.json
dev_mode: true
"#,
    )
    .await
    .unwrap();

    let config = LoaderConfig::from_file(&path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
    assert_eq!(config.registry.call_timeout(), Duration::from_millis(1500));
    assert_eq!(config.registry.replace_policy, ReplacePolicy::Reject);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json_format);
    assert!(!config.logging.file_output);
    assert_eq!(
        config.modules.enabled_pref_path.as_deref(),
        Some(std::path::Path::new("/var/lib/chips/enabled.json"))
    );
    assert!(config.dev_mode);

    let logger_config = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger_config.rotation, RotationStrategy::Hourly);
}

/// 测试 JSON 配置文件加载，缺失项使用默认值
#[tokio::test]
async fn test_load_json_config_with_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("loader.json");
    tokio::fs::write(&path, r#"{ "registry": { "call_timeout_ms": 250 } }"#)
        .await
        .unwrap();

    let config = LoaderConfig::from_file(&path).await.unwrap();
    assert_eq!(config.registry.call_timeout_ms, 250);
    assert_eq!(config.registry.replace_policy, ReplacePolicy::Warn);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.rotation, "daily");
    assert!(config.modules.enabled_pref_path.is_none());
}

/// 测试空 YAML 文件得到默认配置
#[tokio::test]
async fn test_empty_mapping_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("loader.yaml");
    tokio::fs::write(&path, "{}\n").await.unwrap();

    let config = LoaderConfig::from_file(&path).await.unwrap();
    assert_eq!(config.registry.call_timeout_ms, 5000);
    assert!(!config.dev_mode);
}

/// 测试无效配置
#[tokio::test]
async fn test_invalid_configs() {
    let temp_dir = TempDir::new().unwrap();

    let missing = LoaderConfig::from_file(temp_dir.path().join("absent.yaml")).await;
    assert!(matches!(missing, Err(CoreError::ConfigLoadFailed(_))));

    let zero = temp_dir.path().join("zero.yaml");
    tokio::fs::write(&zero, "registry:\n  call_timeout_ms: 0\n")
        .await
        .unwrap();
    match LoaderConfig::from_file(&zero).await {
        Err(CoreError::InvalidConfigValue { key, .. }) => {
            assert_eq!(key, "registry.call_timeout_ms");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let bad_yaml = temp_dir.path().join("bad.yaml");
    tokio::fs::write(&bad_yaml, "registry: [unclosed").await.unwrap();
    assert!(matches!(
        LoaderConfig::from_file(&bad_yaml).await,
        Err(CoreError::Yaml(_))
    ));

    let bad_json = temp_dir.path().join("bad.json");
    tokio::fs::write(&bad_json, "{ not json").await.unwrap();
    assert!(matches!(
        LoaderConfig::from_file(&bad_json).await,
        Err(CoreError::Json(_))
    ));

    let bad_policy = temp_dir.path().join("policy.yaml");
    tokio::fs::write(&bad_policy, "registry:\n  replace_policy: sometimes\n")
        .await
        .unwrap();
    assert!(LoaderConfig::from_file(&bad_policy).await.is_err());
}

/// 测试配置合并
#[test]
fn test_merge_overrides_non_default_values() {
    let mut base = LoaderConfig::builder()
        .call_timeout_ms(1000)
        .log_level("warn")
        .build();

    let overlay = LoaderConfig::builder()
        .replace_policy(ReplacePolicy::Reject)
        .enabled_pref_path("/tmp/enabled.json")
        .dev_mode()
        .build();

    base.merge(overlay);
    // 覆盖层保持默认值的项不会改写基础配置
    assert_eq!(base.registry.call_timeout_ms, 1000);
    assert_eq!(base.logging.level, "warn");
    assert_eq!(base.registry.replace_policy, ReplacePolicy::Reject);
    assert!(base.modules.enabled_pref_path.is_some());
    assert!(base.dev_mode);
}

/// 测试配置驱动注册表和协调器
#[tokio::test(start_paused = true)]
async fn test_config_drives_registry_timeout() {
    let config = LoaderConfig::builder().call_timeout_ms(300).build();
    let registry = CallRegistry::new(RegistryKind::Rpc, config.registry.clone());

    let start = tokio::time::Instant::now();
    let err = registry.call("ghost", "ping", vec![]).await.unwrap_err();
    assert!(matches!(err, CoreError::Timeout { timeout_ms: 300, .. }));
    assert!(start.elapsed() >= Duration::from_millis(300));

    let loader = ModuleLoader::from_config(ModuleCatalogue::new(), &config);
    assert_eq!(loader.rpc_registry().call_timeout(), Duration::from_millis(300));
    assert_eq!(loader.event_registry().kind(), RegistryKind::Event);
    assert_eq!(loader.event_registry().call_timeout(), Duration::from_millis(300));
}

/// 测试文件日志初始化
#[test]
fn test_file_logging_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = LoaderConfig::builder()
        .file_logging(temp_dir.path())
        .log_level("debug")
        .build();

    let logger_config = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger_config.file_output.as_deref(), Some(temp_dir.path()));

    // 全局订阅者可能已被其他测试设置
    let _guard = Logger::try_init(logger_config);
    tracing::info!(module_id = "config-test", "写入文件日志");
}
