//! 归档插件加载器
//!
//! 插件以 tar 归档分发，放在插件目录（可含子目录）下，文件名以配置的后缀结尾。
//! 归档根部的 `plugin-host.yml`（优先）或 `plugin.yml` 是元数据文档，
//! 其余条目是插件命名空间可解析的符号。

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use tracing::{debug, info, warn};

use crate::core::config::HostConfig;
use crate::plugin::description::{PluginDescription, SourceLocation};
use crate::plugin::instance::PluginInstance;
use crate::plugin::loader::{EntryPointTable, LoaderCore, PluginEnvironment, PluginLoader};
use crate::plugin::namespace::SymbolSource;
use crate::utils::{PluginError, Result};

/// 元数据文档的条目名，按优先级排列
pub const METADATA_ENTRIES: [&str; 2] = ["plugin-host.yml", "plugin.yml"];

/// 归档加载器的默认名称
pub const ARCHIVE_LOADER_NAME: &str = "archive";

/// 归档内容
#[derive(Debug)]
pub struct ArchiveSource {
    location: SourceLocation,
    path: PathBuf,
}

impl ArchiveSource {
    /// 绑定到归档文件
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            location: SourceLocation::Archive(path.clone()),
            path,
        }
    }
}

impl SymbolSource for ArchiveSource {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut archive = tar::Archive::new(File::open(&self.path)?);
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry_name(&entry)? == name {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

/// 条目路径，去掉开头的 `./`
fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry.path()?;
    let name = path.to_string_lossy();
    Ok(name.trim_start_matches("./").to_string())
}

/// 读取归档中的元数据文档
///
/// 两个候选条目都存在时取 `plugin-host.yml`。
pub fn read_metadata_document(path: &Path) -> Result<String> {
    let mut archive = tar::Archive::new(File::open(path)?);
    let mut found: [Option<String>; 2] = [None, None];

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry_name(&entry)?;
        if let Some(index) = METADATA_ENTRIES.iter().position(|candidate| *candidate == name) {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            found[index] = Some(content);
            if index == 0 {
                break;
            }
        }
    }

    let [primary, fallback] = found;
    primary.or(fallback).ok_or_else(|| {
        PluginError::InvalidDescription(format!(
            "{} 中没有元数据文档 ({})",
            path.display(),
            METADATA_ENTRIES.join(" / ")
        ))
    })
}

/// 递归收集目录下以 `suffix` 结尾（不区分大小写）的文件，按路径排序
fn collect_packages(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let suffix = suffix.to_ascii_lowercase();
    let mut packages = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(&suffix))
                .unwrap_or(false)
            {
                packages.push(path);
            }
        }
    }

    packages.sort();
    Ok(packages)
}

/// 扫描插件目录，返回可用的描述
///
/// 元数据缺失、无法解析或宿主版本不满足要求的包被跳过并记录警告。
fn scan(dir: &Path, suffix: &str, host_version: &Version) -> Result<Vec<PluginDescription>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        info!(path = %dir.display(), "创建插件目录");
        return Ok(Vec::new());
    }

    let mut descriptions = Vec::new();
    for path in collect_packages(dir, suffix)? {
        let description = read_metadata_document(&path).and_then(|content| {
            PluginDescription::parse(&content, SourceLocation::Archive(path.clone()))
        });
        match description {
            Ok(description) if !description.supports_host(host_version) => {
                warn!(
                    path = %path.display(),
                    plugin = %description.name(),
                    host = %host_version,
                    required = ?description.metadata().host,
                    "插件要求的宿主版本不匹配，已跳过"
                );
            }
            Ok(description) => {
                debug!(path = %path.display(), plugin = %description, "发现插件");
                descriptions.push(description);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "无法读取插件描述，已跳过");
            }
        }
    }
    Ok(descriptions)
}

/// 归档插件加载器
pub struct ArchivePluginLoader {
    core: LoaderCore,
    plugins_dir: PathBuf,
    suffix: String,
}

impl ArchivePluginLoader {
    /// 创建加载器
    pub fn new(
        plugins_dir: impl Into<PathBuf>,
        suffix: impl Into<String>,
        env: Arc<PluginEnvironment>,
        entry_points: Arc<EntryPointTable>,
    ) -> Self {
        Self {
            core: LoaderCore::new(ARCHIVE_LOADER_NAME, env, entry_points),
            plugins_dir: plugins_dir.into(),
            suffix: suffix.into(),
        }
    }

    /// 按宿主配置创建加载器
    pub fn from_config(
        config: &HostConfig,
        env: Arc<PluginEnvironment>,
        entry_points: Arc<EntryPointTable>,
    ) -> Self {
        Self::new(&config.plugins_dir, &config.archive_suffix, env, entry_points)
    }

    /// 插件目录
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }
}

#[async_trait]
impl PluginLoader for ArchivePluginLoader {
    fn core(&self) -> &LoaderCore {
        &self.core
    }

    async fn list_descriptions_unsorted(&self) -> Result<Vec<PluginDescription>> {
        let dir = self.plugins_dir.clone();
        let suffix = self.suffix.clone();
        let host_version = self.core.env().host_version().clone();

        let descriptions = tokio::task::spawn_blocking(move || scan(&dir, &suffix, &host_version))
            .await
            .map_err(|e| PluginError::Other(e.into()))??;

        info!(
            loader = %self.core.name(),
            path = %self.plugins_dir.display(),
            count = descriptions.len(),
            "插件扫描完成"
        );
        Ok(descriptions)
    }

    async fn load_plugin(&self, description: &PluginDescription) -> Result<Arc<PluginInstance>> {
        let path = match description.source() {
            SourceLocation::Archive(path) => path.clone(),
            other => {
                return Err(PluginError::InvalidDescription(format!(
                    "插件 '{}' 的来源 {} 不是归档文件",
                    description.name(),
                    other
                )))
            }
        };
        self.core.load(description, Box::new(ArchiveSource::new(path))).await
    }
}
