//! 插件管理器
//!
//! 进程级的加载器注册表，驱动全局重载并向命令框架、设置层等协作方暴露插件列表。
//!
//! # 重载流程
//!
//! 1. 所有加载器 `disable_all`，清理上一轮状态
//! 2. 每个加载器发现并排序描述，任一加载器解析失败则整个重载中止
//! 3. 按解析顺序逐个加载，单个失败只记录并跳过
//! 4. 第一波启用 `Infrastructure` 类插件
//! 5. 第二波启用 `Normal` 类插件

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::core::config::HostConfig;
use crate::plugin::archive::ArchivePluginLoader;
use crate::plugin::description::{PluginDescription, PluginKind};
use crate::plugin::event::PluginEvent;
use crate::plugin::instance::PluginInstance;
use crate::plugin::loader::{EntryPointTable, PluginEnvironment, PluginLoader};
use crate::utils::{PluginError, Result};

/// 一次重载的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    /// 成功加载的插件
    pub loaded: Vec<String>,
    /// 加载失败的插件
    pub failed: Vec<String>,
    /// 启用成功的插件（启用顺序）
    pub enabled: Vec<String>,
}

/// 插件管理器
pub struct PluginManager {
    config: HostConfig,
    env: Arc<PluginEnvironment>,
    entry_points: Arc<EntryPointTable>,
    /// 加载器注册表（注册顺序），只保护注册和枚举
    loaders: Mutex<Vec<Arc<dyn PluginLoader>>>,
}

impl PluginManager {
    /// 创建没有任何加载器的管理器
    pub fn new(config: HostConfig) -> Self {
        info!(
            plugins_dir = %config.plugins_dir.display(),
            data_dir = %config.data_dir.display(),
            "创建插件管理器"
        );
        let env = PluginEnvironment::from_config(&config);
        Self {
            config,
            env,
            entry_points: EntryPointTable::new(),
            loaders: Mutex::new(Vec::new()),
        }
    }

    /// 创建管理器并注册归档加载器
    pub fn with_archive_loader(config: HostConfig) -> Self {
        let manager = Self::new(config);
        let loader = ArchivePluginLoader::from_config(
            &manager.config,
            manager.env.clone(),
            manager.entry_points.clone(),
        );
        manager.register_loader(Arc::new(loader));
        manager
    }

    /// 宿主配置
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// 加载器共享的宿主环境
    pub fn env(&self) -> &Arc<PluginEnvironment> {
        &self.env
    }

    /// 入口点表
    pub fn entry_points(&self) -> &Arc<EntryPointTable> {
        &self.entry_points
    }

    /// 订阅生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.env.subscribe()
    }

    // ==================== 加载器注册表 ====================

    /// 注册加载器
    ///
    /// 同名加载器已注册时返回 `false` 且不做任何修改。
    pub fn register_loader(&self, loader: Arc<dyn PluginLoader>) -> bool {
        let mut loaders = self.loaders.lock();
        if loaders.iter().any(|l| l.name() == loader.name()) {
            warn!(loader = %loader.name(), "加载器已注册");
            return false;
        }
        info!(loader = %loader.name(), "注册加载器");
        loaders.push(loader);
        true
    }

    /// 注册加载器，同名已存在时返回错误
    pub fn try_register_loader(&self, loader: Arc<dyn PluginLoader>) -> Result<()> {
        let name = loader.name().to_string();
        if self.register_loader(loader) {
            Ok(())
        } else {
            Err(PluginError::LoaderAlreadyRegistered(name))
        }
    }

    /// 注销加载器，返回是否有加载器被移除
    ///
    /// 已加载的实例仍归该加载器所有，调用方负责先行 `disable_all`。
    pub fn unregister_loader(&self, name: &str) -> bool {
        let mut loaders = self.loaders.lock();
        let before = loaders.len();
        loaders.retain(|l| l.name() != name);
        let removed = loaders.len() != before;
        if removed {
            info!(loader = %name, "注销加载器");
        }
        removed
    }

    /// 已注册的加载器快照（注册顺序）
    pub fn loaders(&self) -> Vec<Arc<dyn PluginLoader>> {
        self.loaders.lock().clone()
    }

    // ==================== 查询 ====================

    /// 所有加载器持有的实例，按加载器注册顺序、加载顺序排列
    pub async fn list_all_modules(&self) -> Vec<Arc<PluginInstance>> {
        let mut all = Vec::new();
        for loader in self.loaders() {
            all.extend(loader.loaded_plugins().await);
        }
        all
    }

    /// 按名称查找实例
    pub async fn find_plugin(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.locate(name).await.map(|(_, instance)| instance)
    }

    async fn locate(&self, name: &str) -> Option<(Arc<dyn PluginLoader>, Arc<PluginInstance>)> {
        for loader in self.loaders() {
            if let Some(instance) = loader
                .loaded_plugins()
                .await
                .into_iter()
                .find(|p| p.name() == name)
            {
                return Some((loader, instance));
            }
        }
        None
    }

    // ==================== 单个插件操作 ====================

    /// 启用指定插件
    #[instrument(skip(self))]
    pub async fn enable_plugin(&self, name: &str) -> Result<()> {
        let (loader, instance) = self
            .locate(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        loader.enable(&instance).await;
        Ok(())
    }

    /// 禁用指定插件
    #[instrument(skip(self))]
    pub async fn disable_plugin(&self, name: &str) -> Result<()> {
        let (loader, instance) = self
            .locate(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        loader.disable(&instance).await;
        Ok(())
    }

    /// 卸载指定插件
    #[instrument(skip(self))]
    pub async fn unload_plugin(&self, name: &str) -> Result<()> {
        let (loader, instance) = self
            .locate(name)
            .await
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        loader.unload(&instance).await;
        Ok(())
    }

    // ==================== 全局操作 ====================

    /// 全局重载
    ///
    /// # 错误
    ///
    /// 任一加载器的描述发现或依赖解析失败时返回该错误，此时没有插件被加载。
    /// 单个插件的加载或启用失败只记录在日志和报告中。
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<ReloadReport> {
        let loaders = self.loaders();
        info!(loaders = loaders.len(), "开始重载插件");

        // 1. 清理
        for loader in &loaders {
            loader.disable_all().await;
        }

        // 2. 发现并解析
        let mut plans: Vec<(Arc<dyn PluginLoader>, Vec<PluginDescription>)> =
            Vec::with_capacity(loaders.len());
        for loader in &loaders {
            let order = match loader.list_descriptions().await {
                Ok(order) => order,
                Err(e) => {
                    if e.is_resolution_error() {
                        error!(loader = %loader.name(), code = e.error_code(), error = %e, "依赖解析失败，重载中止");
                    } else {
                        error!(loader = %loader.name(), code = e.error_code(), error = %e, "插件发现失败，重载中止");
                    }
                    return Err(e);
                }
            };
            debug!(
                loader = %loader.name(),
                order = ?order.iter().map(|d| d.name()).collect::<Vec<_>>(),
                "加载顺序"
            );
            plans.push((loader.clone(), order));
        }

        // 3. 加载
        let mut report = ReloadReport::default();
        let mut loaded: Vec<(Arc<dyn PluginLoader>, Arc<PluginInstance>)> = Vec::new();
        for (loader, order) in plans {
            for description in order {
                match loader.load_plugin(&description).await {
                    Ok(instance) => {
                        report.loaded.push(instance.name().to_string());
                        loaded.push((loader.clone(), instance));
                    }
                    Err(e) => {
                        error!(
                            loader = %loader.name(),
                            plugin = %description.name(),
                            error = %e,
                            "插件加载失败，已跳过"
                        );
                        report.failed.push(description.name().to_string());
                    }
                }
            }
        }

        // 4, 5. 分两波启用
        for wave in [PluginKind::Infrastructure, PluginKind::Normal] {
            debug!(kind = %wave, "启用波次开始");
            for (loader, instance) in loaded.iter().filter(|(_, p)| p.description().kind() == wave) {
                loader.enable(instance).await;
                if instance.is_enabled() {
                    report.enabled.push(instance.name().to_string());
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            enabled = report.enabled.len(),
            "插件重载完成"
        );
        Ok(report)
    }

    /// 关闭：按注册逆序卸载所有加载器的全部插件
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("关闭插件管理器");
        for loader in self.loaders().iter().rev() {
            loader.disable_all().await;
        }
    }
}
