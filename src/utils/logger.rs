//! 日志系统模块
//!
//! 基于 tracing 生态实现宿主日志：
//!
//! - 多级别日志支持（TRACE, DEBUG, INFO, WARN, ERROR），可被 `RUST_LOG` 覆盖
//! - 结构化日志（JSON 格式输出）
//! - 文件日志输出（异步非阻塞，按时间轮转）
//!
//! # 示例
//!
//! ```rust,no_run
//! use plugin_host::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let _guard = Logger::init(
//!     LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Daily)
//!         .build(),
//! )
//! .unwrap();
//!
//! tracing::info!(plugin = "core", "插件已启用");
//! ```

use crate::utils::{PluginError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }

    /// 从字符串解析轮转策略，无法识别时回退为每天轮转
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别
    pub level: String,
    /// 是否使用 JSON 格式输出
    pub json_format: bool,
    /// 是否输出到控制台
    pub console_output: bool,
    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 日志轮转策略
    pub rotation: RotationStrategy,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否启用 ANSI 颜色（仅控制台）
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "plugin-host".to_string(),
            rotation: RotationStrategy::Daily,
            show_target: true,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::new()
    }

    /// 从 HostConfig 的 LogConfig 创建
    pub fn from_log_config(log_config: &crate::core::config::LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: LoggerConfig::default(),
        }
    }

    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时会刷新所有挂起的日志。
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl LogGuard {
    fn empty() -> Self {
        Self { _guards: Vec::new() }
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<bool> = OnceLock::new();

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化日志系统
    ///
    /// 返回的 `LogGuard` 必须保持存活直到程序退出。
    ///
    /// # Errors
    ///
    /// 日志系统已初始化或全局订阅者设置失败时返回 `InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(PluginError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.level));

        let mut guard = LogGuard::empty();
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

        if config.console_output {
            let (writer, console_guard) = tracing_appender::non_blocking(io::stdout());
            guard._guards.push(console_guard);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target);
            if config.json_format {
                layers.push(layer.json().with_ansi(false).boxed());
            } else {
                layers.push(layer.with_ansi(config.ansi_colors).boxed());
            }
        }

        if let Some(ref log_dir) = config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                log_dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard._guards.push(file_guard);
            // 文件不使用 ANSI
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(false);
            if config.json_format {
                layers.push(layer.json().boxed());
            } else {
                layers.push(layer.boxed());
            }
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(env_filter)
            .try_init()
            .map_err(|e| PluginError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(true);
        Ok(guard)
    }

    /// 尝试初始化日志系统，已初始化时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_else(|_| LogGuard::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parse() {
        assert_eq!(RotationStrategy::parse("never"), RotationStrategy::Never);
        assert_eq!(RotationStrategy::parse("HOURLY"), RotationStrategy::Hourly);
        assert_eq!(RotationStrategy::parse("bogus"), RotationStrategy::Daily);
    }

    #[test]
    fn test_builder() {
        let config = LoggerConfig::builder()
            .level("debug")
            .json_format(true)
            .file_output("/tmp/logs")
            .build();
        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.file_output, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn test_from_log_config() {
        let log_config = crate::core::config::LogConfig {
            level: "warn".into(),
            file_output: false,
            log_dir: Some(PathBuf::from("/tmp/ignored")),
            json_format: false,
            rotation: "hourly".into(),
        };
        let config = LoggerConfig::from_log_config(&log_config);
        assert_eq!(config.level, "warn");
        assert!(config.file_output.is_none());
        assert_eq!(config.rotation, RotationStrategy::Hourly);
    }

    #[test]
    fn test_try_init_twice_does_not_panic() {
        let _first = Logger::try_init(LoggerConfig::builder().console_output(false).build());
        let _second = Logger::try_init(LoggerConfig::default());
    }
}
