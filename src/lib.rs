//! # Plugin Host - 插件宿主
//!
//! 插件宿主负责插件的依赖解析与生命周期编排，提供以下核心功能：
//!
//! - **依赖解析**: 把无序的插件描述排成加载顺序，检测循环依赖和缺失依赖
//! - **加载器契约**: 每种包格式一个加载器，共享同一套加载/启用/禁用/卸载状态机
//! - **隔离命名空间**: 每个插件独占命名空间，可受控地查找兄弟插件的符号
//! - **分阶段重载**: 基础设施类插件全部启用后才启用普通插件
//! - **配置与日志**: 统一的配置加载和结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use plugin_host::{HostConfig, PluginManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = PluginManager::with_archive_loader(HostConfig::default());
//!
//!     // 入口点由宿主按 `main` 字段注册
//!     manager.entry_points().register("demo.Main", |_ctx| {
//!         struct Demo;
//!         impl plugin_host::Plugin for Demo {}
//!         Ok(Box::new(Demo) as Box<dyn plugin_host::Plugin>)
//!     });
//!
//!     let report = manager.reload().await?;
//!     println!("已启用: {:?}", report.enabled);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `plugin` - 描述、解析器、加载器、命名空间和管理器
//! - `utils` - 错误类型和日志
//! - `core` - 宿主配置

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod plugin;
pub mod utils;

// 重导出常用类型，方便使用
pub use plugin::{
    ArchivePluginLoader, BuiltinPluginLoader, DependencyRef, DependencyResolver, EntryPointTable,
    LoaderCore, Namespace, Plugin, PluginContext, PluginDescription, PluginEnvironment,
    PluginEvent, PluginEventKind, PluginInstance, PluginKind, PluginLoader, PluginManager,
    PluginMetadata, PluginState, ReloadReport, SourceLocation, Symbol,
};

pub use utils::{error_code, PluginError, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{HostConfig, HostConfigBuilder, LogConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
