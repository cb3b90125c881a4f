//! 配置与日志集成测试
//!
//! 测试从磁盘加载宿主配置，并用配置驱动管理器和日志系统

use plugin_host::{HostConfig, Logger, LoggerConfig, PluginError, PluginManager, RotationStrategy};
use tempfile::TempDir;

/// 从 YAML 文件加载配置并驱动管理器
#[tokio::test]
async fn test_yaml_config_drives_manager() {
    let temp_dir = TempDir::new().unwrap();
    let plugins = temp_dir.path().join("packages");
    let data = temp_dir.path().join("state");

    let config_path = temp_dir.path().join("host.yaml");
    tokio::fs::write(
        &config_path,
        format!(
            r#"
plugins_dir: {}
data_dir: {}
archive_suffix: .pkg
event_capacity: 8
logging:
  level: debug
  json_format: true
  rotation: hourly
unknown_key: ignored
"#,
            plugins.display(),
            data.display()
        ),
    )
    .await
    .unwrap();

    let config = HostConfig::from_file(&config_path).await.unwrap();
    assert_eq!(config.config_path.as_deref(), Some(config_path.as_path()));
    assert_eq!(config.archive_suffix, ".pkg");
    assert_eq!(config.event_capacity, 8);

    let logger = LoggerConfig::from_log_config(&config.logging);
    assert_eq!(logger.level, "debug");
    assert!(logger.json_format);
    assert_eq!(logger.rotation, RotationStrategy::Hourly);

    // 空目录在第一次重载时被创建
    let manager = PluginManager::with_archive_loader(config);
    let report = manager.reload().await.unwrap();
    assert!(report.loaded.is_empty());
    assert!(plugins.is_dir());
    assert_eq!(manager.env().data_root(), data.as_path());
}

/// 无效取值在加载时被拒绝
#[tokio::test]
async fn test_invalid_values_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let path = temp_dir.path().join("bad-suffix.yaml");
    tokio::fs::write(&path, "archive_suffix: tar\n").await.unwrap();
    assert!(matches!(
        HostConfig::from_file(&path).await,
        Err(PluginError::ConfigLoadFailed(_))
    ));

    let path = temp_dir.path().join("zero.json");
    tokio::fs::write(&path, r#"{"event_capacity": 0}"#).await.unwrap();
    assert!(matches!(
        HostConfig::from_file(&path).await,
        Err(PluginError::ConfigLoadFailed(_))
    ));

    let path = temp_dir.path().join("broken.yaml");
    tokio::fs::write(&path, "plugins_dir: [oops\n").await.unwrap();
    assert!(matches!(
        HostConfig::from_file(&path).await,
        Err(PluginError::Yaml(_))
    ));
}

/// 文件日志写入配置的目录
#[test]
fn test_logger_with_file_output() {
    let temp_dir = TempDir::new().unwrap();
    let config = LoggerConfig::builder()
        .level("debug")
        .console_output(false)
        .file_output(temp_dir.path())
        .rotation(RotationStrategy::Never)
        .build();

    // 同一进程内可能已有其它测试初始化过，try_init 不会失败
    let guard = Logger::try_init(config);
    tracing::info!(plugin = "demo", "插件已启用");
    drop(guard);
}
