//! 宿主配置
//!
//! 定义宿主的配置结构和加载逻辑。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::{PluginError, Result};

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 宿主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 插件包目录（递归扫描）
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    /// 插件数据根目录，每个插件在其下拥有以名称命名的子目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// 归档插件包的文件后缀（含 '.'，大小写不敏感）
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,

    /// 生命周期事件通道容量
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_archive_suffix() -> String {
    ".tar".to_string()
}

fn default_event_capacity() -> usize {
    64
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            plugins_dir: default_plugins_dir(),
            data_dir: default_data_dir(),
            archive_suffix: default_archive_suffix(),
            event_capacity: default_event_capacity(),
            logging: LogConfig::default(),
        }
    }
}

impl HostConfig {
    /// 创建配置构建器
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::new()
    }

    /// 从文件加载配置，`.json` 按 JSON 解析，其余按 YAML 解析
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            PluginError::ConfigLoadFailed(format!("无法读取 {}: {}", path.display(), e))
        })?;

        let mut config: HostConfig = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        config.validate()?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if !self.archive_suffix.starts_with('.') || self.archive_suffix.len() < 2 {
            return Err(PluginError::ConfigLoadFailed(format!(
                "archive_suffix 必须以 '.' 开头: '{}'",
                self.archive_suffix
            )));
        }
        if self.event_capacity == 0 {
            return Err(PluginError::ConfigLoadFailed(
                "event_capacity 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: HostConfig::default(),
        }
    }

    /// 设置插件目录
    pub fn plugins_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.plugins_dir = dir.into();
        self
    }

    /// 设置数据目录
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// 设置归档后缀
    pub fn archive_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.archive_suffix = suffix.into();
        self
    }

    /// 设置事件通道容量
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> HostConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.plugins_dir, PathBuf::from("./plugins"));
        assert_eq!(config.archive_suffix, ".tar");
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = HostConfig::builder()
            .plugins_dir("/srv/plugins")
            .data_dir("/srv/data")
            .log_level("debug")
            .build();

        assert_eq!(config.plugins_dir, PathBuf::from("/srv/plugins"));
        assert_eq!(config.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_suffix() {
        let config = HostConfig::builder().archive_suffix("tar").build();
        assert!(matches!(
            config.validate(),
            Err(PluginError::ConfigLoadFailed(_))
        ));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: HostConfig = serde_yaml::from_str("plugins_dir: /opt/p\n").unwrap();
        assert_eq!(config.plugins_dir, PathBuf::from("/opt/p"));
        assert_eq!(config.event_capacity, 64);
        assert_eq!(config.logging.rotation, "daily");
    }

    #[tokio::test]
    async fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        tokio::fs::write(&path, r#"{"archive_suffix": ".plug", "logging": {"level": "trace"}}"#)
            .await
            .unwrap();

        let config = HostConfig::from_file(&path).await.unwrap();
        assert_eq!(config.archive_suffix, ".plug");
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.config_path, Some(path));
    }

    #[tokio::test]
    async fn test_from_missing_file() {
        let result = HostConfig::from_file("/nonexistent/host.yaml").await;
        assert!(matches!(result, Err(PluginError::ConfigLoadFailed(_))));
    }
}
