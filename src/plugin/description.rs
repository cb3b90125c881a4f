//! 插件描述
//!
//! 定义插件元数据文档（`plugin.yml`）的结构，以及发现阶段产出的不可变描述。
//! 元数据在解析时一次性校验，之后描述不再变化。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use semver::{Version, VersionReq};

use crate::utils::{PluginError, Result};

/// 插件种类
///
/// 基础设施类插件在任何普通插件开始启用之前全部启用完毕。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// 基础设施（例如额外的加载器、共享工具）
    #[serde(alias = "loader")]
    Infrastructure,
    /// 普通插件
    #[default]
    Normal,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Infrastructure => write!(f, "infrastructure"),
            PluginKind::Normal => write!(f, "normal"),
        }
    }
}

/// 依赖声明
///
/// 只按名称匹配，不协商版本。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawDependency")]
pub struct DependencyRef {
    /// 依赖插件名称
    pub name: String,
    /// 是否为可选依赖
    pub optional: bool,
}

impl DependencyRef {
    /// 必需依赖
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    /// 可选依赖
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// 元数据文档中依赖的两种写法：`"name"` / `"?name"`，或 `{name, optional}`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Short(String),
    Full {
        name: String,
        #[serde(default)]
        optional: bool,
    },
}

impl From<RawDependency> for DependencyRef {
    fn from(raw: RawDependency) -> Self {
        match raw {
            RawDependency::Short(s) => match s.strip_prefix('?') {
                Some(name) => DependencyRef::optional(name.trim()),
                None => DependencyRef::required(s.trim()),
            },
            RawDependency::Full { name, optional } => Self { name, optional },
        }
    }
}

/// 插件包来源
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLocation {
    /// 磁盘上的归档文件
    Archive(PathBuf),
    /// 编译进宿主的内置包
    Builtin(String),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Archive(path) => write!(f, "{}", path.display()),
            SourceLocation::Builtin(id) => write!(f, "builtin:{}", id),
        }
    }
}

/// 插件元数据文档
///
/// 对应插件包内的 `plugin-host.yml` / `plugin.yml`，未知字段被忽略。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// 插件名称（同一加载器内唯一）
    pub name: String,

    /// 插件版本（semver 格式）
    pub version: String,

    /// 入口点引用，由加载器的工厂表解析
    pub main: String,

    /// 作者
    #[serde(default)]
    pub author: String,

    /// 简介
    #[serde(default)]
    pub info: String,

    /// 要求的核心版本范围
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<String>,

    /// 要求的宿主版本范围
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,

    /// 插件种类
    #[serde(default)]
    pub kind: PluginKind,

    /// 依赖声明（有序）
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
}

impl PluginMetadata {
    /// 创建只含必填字段的元数据
    pub fn new(name: impl Into<String>, main: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.1.0".to_string(),
            main: main.into(),
            author: String::new(),
            info: String::new(),
            core: None,
            host: None,
            tags: Vec::new(),
            kind: PluginKind::Normal,
            dependencies: Vec::new(),
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置种类
    pub fn with_kind(mut self, kind: PluginKind) -> Self {
        self.kind = kind;
        self
    }

    /// 追加必需依赖
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(DependencyRef::required(name));
        self
    }

    /// 追加可选依赖
    pub fn soft_depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(DependencyRef::optional(name));
        self
    }

    /// 设置宿主版本要求
    pub fn with_host_requirement(mut self, req: impl Into<String>) -> Self {
        self.host = Some(req.into());
        self
    }

    /// 验证元数据有效性
    ///
    /// 执行以下验证：
    /// - 名称非空且只含字母、数字、`_`、`-`、`.`
    /// - 版本号为 semver
    /// - 入口点非空
    /// - 依赖名称有效且不依赖自身
    /// - `core` / `host` 为合法的版本范围
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.name.is_empty() {
            errors.push("插件名称不能为空".to_string());
        } else if !is_valid_plugin_name(&self.name) {
            errors.push(format!(
                "插件名称 '{}' 格式无效，只允许字母、数字、下划线、连字符和点",
                self.name
            ));
        }

        if Version::parse(&self.version).is_err() {
            errors.push(format!("无效的版本号格式: '{}'", self.version));
        }

        if self.main.trim().is_empty() {
            errors.push("入口点不能为空".to_string());
        }

        for (index, dep) in self.dependencies.iter().enumerate() {
            if !is_valid_plugin_name(&dep.name) {
                errors.push(format!("第 {} 个依赖名称无效: '{}'", index + 1, dep.name));
            } else if dep.name == self.name {
                errors.push(format!("插件 '{}' 不能依赖自身", self.name));
            }
        }

        for (field, value) in [("core", &self.core), ("host", &self.host)] {
            if let Some(req) = value {
                if VersionReq::parse(req).is_err() {
                    errors.push(format!("{} 版本范围格式无效: '{}'", field, req));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::InvalidDescription(errors.join("; ")))
        }
    }
}

/// 名称只允许字母、数字、下划线、连字符和点
pub fn is_valid_plugin_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// 插件描述
///
/// 发现阶段产出的不可变记录，克隆开销为一次引用计数。
#[derive(Debug, Clone)]
pub struct PluginDescription {
    inner: Arc<DescriptionInner>,
}

#[derive(Debug)]
struct DescriptionInner {
    metadata: PluginMetadata,
    source: SourceLocation,
}

impl PluginDescription {
    /// 从已校验的元数据创建描述
    pub fn new(metadata: PluginMetadata, source: SourceLocation) -> Result<Self> {
        metadata.validate()?;
        Ok(Self {
            inner: Arc::new(DescriptionInner { metadata, source }),
        })
    }

    /// 从 YAML 元数据文档解析描述
    ///
    /// # Errors
    ///
    /// - YAML 解析失败时返回 `Yaml` 错误
    /// - 校验失败时返回 `InvalidDescription` 错误
    pub fn parse(content: &str, source: SourceLocation) -> Result<Self> {
        let metadata: PluginMetadata = serde_yaml::from_str(content)?;
        Self::new(metadata, source)
    }

    /// 插件名称
    pub fn name(&self) -> &str {
        &self.inner.metadata.name
    }

    /// 插件版本
    pub fn version(&self) -> &str {
        &self.inner.metadata.version
    }

    /// 插件种类
    pub fn kind(&self) -> PluginKind {
        self.inner.metadata.kind
    }

    /// 入口点引用
    pub fn entry_point(&self) -> &str {
        &self.inner.metadata.main
    }

    /// 依赖声明
    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.inner.metadata.dependencies
    }

    /// 插件包来源
    pub fn source(&self) -> &SourceLocation {
        &self.inner.source
    }

    /// 完整元数据
    pub fn metadata(&self) -> &PluginMetadata {
        &self.inner.metadata
    }

    /// 检查宿主版本是否满足插件声明的 `host` 要求，未声明时总是满足
    pub fn supports_host(&self, host_version: &Version) -> bool {
        match &self.inner.metadata.host {
            Some(req) => VersionReq::parse(req)
                .map(|req| req.matches(host_version))
                .unwrap_or(false),
            None => true,
        }
    }
}

impl fmt::Display for PluginDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name(), self.version())
    }
}
