//! 插件宿主错误类型定义
//!
//! 本模块定义了宿主中使用的所有错误类型。

use thiserror::Error;

/// 插件宿主核心错误类型
#[derive(Error, Debug)]
pub enum PluginError {
    // ==================== 依赖解析错误 ====================

    /// 循环依赖，附带完整的解析链
    #[error("检测到循环依赖: {}", .chain.join(" -> "))]
    CyclicDependency {
        /// 出现循环时正在解析的名称链（最后一个元素为重复出现的名称）
        chain: Vec<String>,
    },

    /// 必需依赖在整个解析批次中都不存在
    #[error("插件 '{plugin}' 依赖未知插件 '{dependency}'")]
    UnknownRequiredDependency {
        /// 声明依赖的插件
        plugin: String,
        /// 缺失的依赖名称
        dependency: String,
    },

    // ==================== 加载错误 ====================

    /// 同一个插件包被重复实例化
    #[error("插件已加载: '{0}'")]
    AlreadyLoaded(String),

    /// 加载时必需依赖尚未被加载
    #[error("加载插件 '{plugin}' 失败: 缺少依赖 '{dependency}'")]
    MissingDependency {
        /// 正在加载的插件
        plugin: String,
        /// 尚未加载的依赖名称
        dependency: String,
    },

    /// 从入口点构造插件实例失败
    #[error("插件 '{plugin}' 入口点构造失败: {source:#}")]
    EntryPointConstructionFailure {
        /// 构造失败的插件
        plugin: String,
        /// 工厂或 `on_load` 返回的错误
        #[source]
        source: anyhow::Error,
    },

    /// 插件描述无效
    #[error("无效的插件描述: {0}")]
    InvalidDescription(String),

    /// 插件未找到
    #[error("插件未找到: '{0}'")]
    PluginNotFound(String),

    // ==================== 命名空间错误 ====================

    /// 符号未找到
    #[error("符号未找到: '{0}'")]
    SymbolNotFound(String),

    /// 命名空间已关闭
    #[error("命名空间已关闭: '{0}'")]
    NamespaceClosed(String),

    // ==================== 管理器错误 ====================

    /// 同名加载器已注册
    #[error("加载器已注册: '{0}'")]
    LoaderAlreadyRegistered(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

    // ==================== 通用错误 ====================

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 宿主操作结果类型别名
pub type Result<T> = std::result::Result<T, PluginError>;

/// 错误码常量
pub mod error_code {
    // 解析错误 (RESOLVE-xxx)
    /// 循环依赖
    pub const RESOLVE_CYCLIC_DEPENDENCY: &str = "RESOLVE-001";
    /// 未知的必需依赖
    pub const RESOLVE_UNKNOWN_DEPENDENCY: &str = "RESOLVE-002";

    // 插件错误 (PLUGIN-xxx)
    /// 插件已加载
    pub const PLUGIN_ALREADY_LOADED: &str = "PLUGIN-001";
    /// 加载时缺少依赖
    pub const PLUGIN_MISSING_DEPENDENCY: &str = "PLUGIN-002";
    /// 入口点构造失败
    pub const PLUGIN_ENTRY_POINT_FAILED: &str = "PLUGIN-003";
    /// 无效的插件描述
    pub const PLUGIN_INVALID_DESCRIPTION: &str = "PLUGIN-004";
    /// 插件未找到
    pub const PLUGIN_NOT_FOUND: &str = "PLUGIN-005";

    // 命名空间错误 (NAMESPACE-xxx)
    /// 符号未找到
    pub const NAMESPACE_SYMBOL_NOT_FOUND: &str = "NAMESPACE-001";
    /// 命名空间已关闭
    pub const NAMESPACE_CLOSED: &str = "NAMESPACE-002";

    // 加载器错误 (LOADER-xxx)
    /// 加载器已注册
    pub const LOADER_ALREADY_REGISTERED: &str = "LOADER-001";

    // 配置错误 (CONFIG-xxx)
    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
}

impl PluginError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            PluginError::CyclicDependency { .. } => error_code::RESOLVE_CYCLIC_DEPENDENCY,
            PluginError::UnknownRequiredDependency { .. } => error_code::RESOLVE_UNKNOWN_DEPENDENCY,
            PluginError::AlreadyLoaded(_) => error_code::PLUGIN_ALREADY_LOADED,
            PluginError::MissingDependency { .. } => error_code::PLUGIN_MISSING_DEPENDENCY,
            PluginError::EntryPointConstructionFailure { .. } => {
                error_code::PLUGIN_ENTRY_POINT_FAILED
            }
            PluginError::InvalidDescription(_) => error_code::PLUGIN_INVALID_DESCRIPTION,
            PluginError::PluginNotFound(_) => error_code::PLUGIN_NOT_FOUND,
            PluginError::SymbolNotFound(_) => error_code::NAMESPACE_SYMBOL_NOT_FOUND,
            PluginError::NamespaceClosed(_) => error_code::NAMESPACE_CLOSED,
            PluginError::LoaderAlreadyRegistered(_) => error_code::LOADER_ALREADY_REGISTERED,
            PluginError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            _ => "UNKNOWN",
        }
    }

    /// 是否为依赖解析阶段的错误（整批失败）
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            PluginError::CyclicDependency { .. } | PluginError::UnknownRequiredDependency { .. }
        )
    }
}
