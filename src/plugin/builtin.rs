//! 内置插件加载器
//!
//! 编译进宿主的插件在启动时登记元数据和包内容，之后与归档插件走同样的生命周期。

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::plugin::description::{PluginDescription, PluginMetadata, SourceLocation};
use crate::plugin::instance::PluginInstance;
use crate::plugin::loader::{EntryPointTable, LoaderCore, PluginEnvironment, PluginLoader};
use crate::plugin::namespace::MemorySource;
use crate::utils::{PluginError, Result};

/// 内置加载器的默认名称
pub const BUILTIN_LOADER_NAME: &str = "builtin";

struct BuiltinPackage {
    description: PluginDescription,
    source: MemorySource,
}

/// 内置插件加载器
pub struct BuiltinPluginLoader {
    core: LoaderCore,
    packages: RwLock<Vec<BuiltinPackage>>,
}

impl BuiltinPluginLoader {
    /// 创建加载器
    pub fn new(env: Arc<PluginEnvironment>, entry_points: Arc<EntryPointTable>) -> Self {
        Self::with_name(BUILTIN_LOADER_NAME, env, entry_points)
    }

    /// 以指定名称创建加载器
    pub fn with_name(
        name: impl Into<Arc<str>>,
        env: Arc<PluginEnvironment>,
        entry_points: Arc<EntryPointTable>,
    ) -> Self {
        Self {
            core: LoaderCore::new(name, env, entry_points),
            packages: RwLock::new(Vec::new()),
        }
    }

    /// 登记内置插件
    ///
    /// `entries` 是包内条目，来源为 `builtin:<name>`。
    pub fn register<I, K, V>(&self, metadata: PluginMetadata, entries: I) -> Result<PluginDescription>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let location = SourceLocation::Builtin(metadata.name.clone());
        let description = PluginDescription::new(metadata, location.clone())?;
        let source = entries
            .into_iter()
            .fold(MemorySource::new(location), |source, (name, data)| {
                source.with_entry(name, data)
            });

        let mut packages = self.packages.write();
        if packages.iter().any(|p| p.description.name() == description.name()) {
            return Err(PluginError::InvalidDescription(format!(
                "内置插件 '{}' 已登记",
                description.name()
            )));
        }
        debug!(loader = %self.core.name(), plugin = %description, "登记内置插件");
        packages.push(BuiltinPackage {
            description: description.clone(),
            source,
        });
        Ok(description)
    }
}

#[async_trait]
impl PluginLoader for BuiltinPluginLoader {
    fn core(&self) -> &LoaderCore {
        &self.core
    }

    async fn list_descriptions_unsorted(&self) -> Result<Vec<PluginDescription>> {
        Ok(self
            .packages
            .read()
            .iter()
            .map(|p| p.description.clone())
            .collect())
    }

    async fn load_plugin(&self, description: &PluginDescription) -> Result<Arc<PluginInstance>> {
        let source = self
            .packages
            .read()
            .iter()
            .find(|p| p.description.source() == description.source())
            .map(|p| p.source.clone())
            .ok_or_else(|| PluginError::PluginNotFound(description.name().to_string()))?;
        self.core.load(description, Box::new(source)).await
    }
}
