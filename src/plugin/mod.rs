//! 插件系统
//!
//! 负责插件的发现、依赖解析、隔离加载和生命周期管理。
//!
//! # 组成
//!
//! - [`PluginDescription`] - 插件元数据与来源
//! - [`DependencyResolver`] - 加载顺序解析
//! - [`PluginLoader`] / [`LoaderCore`] - 按包格式的加载器契约与共享实现
//! - [`Namespace`] - 每个插件独占的隔离命名空间
//! - [`PluginManager`] - 加载器注册表与全局重载

pub mod archive;
pub mod builtin;
pub mod description;
pub mod event;
pub mod instance;
pub mod loader;
pub mod manager;
pub mod namespace;
pub mod resolver;

pub use archive::{ArchivePluginLoader, ArchiveSource, ARCHIVE_LOADER_NAME, METADATA_ENTRIES};
pub use builtin::{BuiltinPluginLoader, BUILTIN_LOADER_NAME};
pub use description::{
    is_valid_plugin_name, DependencyRef, PluginDescription, PluginKind, PluginMetadata,
    SourceLocation,
};
pub use event::{PluginEvent, PluginEventKind};
pub use instance::{Plugin, PluginContext, PluginInstance, PluginState, TaskGroup};
pub use loader::{
    EntryPointTable, LoaderCore, PluginEnvironment, PluginFactory, PluginLoader, HOST_VERSION,
};
pub use manager::{PluginManager, ReloadReport};
pub use namespace::{MemorySource, Namespace, NamespaceArena, Symbol, SymbolSource};
pub use resolver::DependencyResolver;
