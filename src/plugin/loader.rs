//! 插件加载器契约
//!
//! 每种包格式实现一个 [`PluginLoader`]。格式相关的部分只有两处：
//! 发现描述（`list_descriptions_unsorted`）和打开包内容（`load_plugin` 中构造 [`SymbolSource`]）。
//! 加载检查、命名空间、入口点构造、启用/禁用/卸载的状态机全部由 [`LoaderCore`] 统一实现。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use semver::Version;
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::core::config::HostConfig;
use crate::plugin::description::{PluginDescription, SourceLocation};
use crate::plugin::event::{PluginEvent, PluginEventKind};
use crate::plugin::instance::{raw, Plugin, PluginContext, PluginInstance};
use crate::plugin::namespace::{NamespaceArena, SymbolSource};
use crate::plugin::resolver::DependencyResolver;
use crate::utils::{PluginError, Result};

/// 宿主版本，用于匹配插件声明的 `host` 要求
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 加载器共享的宿主环境
#[derive(Debug)]
pub struct PluginEnvironment {
    data_root: PathBuf,
    host_version: Version,
    events: broadcast::Sender<PluginEvent>,
}

impl PluginEnvironment {
    /// 创建环境
    pub fn new(data_root: impl Into<PathBuf>, event_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let host_version = Version::parse(HOST_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0));
        Arc::new(Self {
            data_root: data_root.into(),
            host_version,
            events,
        })
    }

    /// 从宿主配置创建环境
    pub fn from_config(config: &HostConfig) -> Arc<Self> {
        Self::new(&config.data_dir, config.event_capacity)
    }

    /// 插件数据根目录
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// 宿主版本
    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// 订阅生命周期事件
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, kind: PluginEventKind, plugin: &str, loader: &str) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(PluginEvent::new(kind, plugin, loader));
    }
}

/// 入口点工厂
pub type PluginFactory =
    Arc<dyn Fn(&PluginContext) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// 入口点表
///
/// 以描述中的 `main` 字符串为键，提供构造插件钩子对象的工厂。
#[derive(Default)]
pub struct EntryPointTable {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl EntryPointTable {
    /// 创建空表
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 注册工厂，同名的旧工厂被替换
    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn(&PluginContext) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        debug!(entry_point = %entry_point, "注册入口点");
        self.factories.write().insert(entry_point, Arc::new(factory));
    }

    /// 注册以 `Default` 构造的插件类型
    pub fn register_default<P>(&self, entry_point: impl Into<String>)
    where
        P: Plugin + Default + 'static,
    {
        self.register(entry_point, |_| Ok(Box::new(P::default()) as Box<dyn Plugin>));
    }

    /// 查找工厂
    pub fn get(&self, entry_point: &str) -> Option<PluginFactory> {
        self.factories.read().get(entry_point).cloned()
    }

    /// 是否包含入口点
    pub fn contains(&self, entry_point: &str) -> bool {
        self.factories.read().contains_key(entry_point)
    }
}

impl fmt::Debug for EntryPointTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.factories.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("EntryPointTable").field("entry_points", &keys).finish()
    }
}

/// 插件加载器
///
/// 实现者只需提供描述发现和包打开；生命周期操作默认委托给 [`LoaderCore`]。
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// 共享的生命周期实现
    fn core(&self) -> &LoaderCore;

    /// 加载器名称，在同一管理器内唯一
    fn name(&self) -> &str {
        self.core().name()
    }

    /// 发现本加载器能看到的全部描述，顺序不保证
    async fn list_descriptions_unsorted(&self) -> Result<Vec<PluginDescription>>;

    /// 按依赖排序后的描述
    async fn list_descriptions(&self) -> Result<Vec<PluginDescription>> {
        let descriptions = self.list_descriptions_unsorted().await?;
        DependencyResolver::resolve(&descriptions)
    }

    /// 加载一个描述，返回 `Loaded` 状态的实例
    ///
    /// # 错误
    ///
    /// - `PluginError::AlreadyLoaded` - 同一来源的实例已存在
    /// - `PluginError::MissingDependency` - 必需依赖尚未在本加载器中加载
    /// - `PluginError::EntryPointConstructionFailure` - 入口点构造或 `on_load` 失败
    async fn load_plugin(&self, description: &PluginDescription) -> Result<Arc<PluginInstance>>;

    /// 本加载器持有的实例（加载顺序）
    async fn loaded_plugins(&self) -> Vec<Arc<PluginInstance>> {
        self.core().loaded_plugins()
    }

    /// 启用实例，已启用时无操作
    async fn enable(&self, instance: &Arc<PluginInstance>) {
        self.core().enable(instance).await
    }

    /// 禁用实例，未启用时无操作
    async fn disable(&self, instance: &Arc<PluginInstance>) {
        self.core().disable(instance).await
    }

    /// 卸载实例，不属于本加载器时无操作
    async fn unload(&self, instance: &Arc<PluginInstance>) {
        self.core().unload(instance).await
    }

    /// 禁用并卸载全部实例
    async fn disable_all(&self) {
        self.core().disable_all().await
    }
}

/// 加载器共享实现
pub struct LoaderCore {
    name: Arc<str>,
    env: Arc<PluginEnvironment>,
    entry_points: Arc<EntryPointTable>,
    arena: Arc<NamespaceArena>,
    /// 持有的实例（加载顺序）
    plugins: RwLock<Vec<Arc<PluginInstance>>>,
    /// 正在加载的来源
    pending: Mutex<HashSet<SourceLocation>>,
}

impl LoaderCore {
    /// 创建共享实现
    pub fn new(
        name: impl Into<Arc<str>>,
        env: Arc<PluginEnvironment>,
        entry_points: Arc<EntryPointTable>,
    ) -> Self {
        let name = name.into();
        info!(loader = %name, "创建插件加载器");
        Self {
            name,
            env,
            entry_points,
            arena: NamespaceArena::new(),
            plugins: RwLock::new(Vec::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// 加载器名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 宿主环境
    pub fn env(&self) -> &Arc<PluginEnvironment> {
        &self.env
    }

    /// 入口点表
    pub fn entry_points(&self) -> &Arc<EntryPointTable> {
        &self.entry_points
    }

    /// 本加载器的命名空间集合
    pub fn arena(&self) -> &Arc<NamespaceArena> {
        &self.arena
    }

    /// 持有的实例快照（加载顺序）
    pub fn loaded_plugins(&self) -> Vec<Arc<PluginInstance>> {
        self.plugins.read().clone()
    }

    /// 按名称查找持有的实例
    pub fn find(&self, name: &str) -> Option<Arc<PluginInstance>> {
        self.plugins.read().iter().find(|p| p.name() == name).cloned()
    }

    /// 加载描述
    ///
    /// # 加载流程
    /// 1. 检查同一来源未被加载
    /// 2. 检查必需依赖已在本加载器中加载
    /// 3. 创建绑定到 `source` 的命名空间
    /// 4. 通过入口点表构造钩子对象并调用 `on_load`
    /// 5. 登记实例，状态为 `Loaded`
    pub async fn load(
        &self,
        description: &PluginDescription,
        source: Box<dyn SymbolSource>,
    ) -> Result<Arc<PluginInstance>> {
        let name = description.name();
        let location = description.source().clone();
        info!(loader = %self.name, plugin = %name, source = %location, "开始加载插件");

        // 1. 来源检查，同时占住来源防止并发重复加载
        {
            let plugins = self.plugins.read();
            let mut pending = self.pending.lock();
            if pending.contains(&location)
                || plugins.iter().any(|p| p.description().source() == &location)
            {
                warn!(loader = %self.name, plugin = %name, "插件已加载");
                return Err(PluginError::AlreadyLoaded(name.to_string()));
            }
            pending.insert(location.clone());
        }

        let result = self.construct(description, source).await;
        self.pending.lock().remove(&location);

        let instance = result?;
        self.plugins.write().push(instance.clone());
        self.env.emit(PluginEventKind::Loaded, name, &self.name);
        info!(loader = %self.name, plugin = %name, version = %description.version(), "插件加载完成");
        Ok(instance)
    }

    async fn construct(
        &self,
        description: &PluginDescription,
        source: Box<dyn SymbolSource>,
    ) -> Result<Arc<PluginInstance>> {
        let name = description.name();

        // 2. 依赖检查
        {
            let plugins = self.plugins.read();
            for dependency in description.dependencies().iter().filter(|d| !d.optional) {
                if !plugins.iter().any(|p| p.name() == dependency.name) {
                    warn!(plugin = %name, dependency = %dependency.name, "必需依赖尚未加载");
                    return Err(PluginError::MissingDependency {
                        plugin: name.to_string(),
                        dependency: dependency.name.clone(),
                    });
                }
            }
        }

        // 3. 命名空间
        let namespace = self.arena.create(name, source);
        let span = info_span!("plugin", plugin = %name, loader = %self.name);
        let context = PluginContext::new(
            description.clone(),
            namespace.clone(),
            self.env.data_root(),
            span.clone(),
        );

        // 4. 入口点
        let constructed = async {
            let factory = self.entry_points.get(description.entry_point()).ok_or_else(|| {
                anyhow::anyhow!("入口点 '{}' 未注册", description.entry_point())
            })?;
            let plugin = factory(&context)?;
            plugin.on_load(&context).instrument(span.clone()).await?;
            Ok::<_, anyhow::Error>(plugin)
        }
        .await;

        let plugin = match constructed {
            Ok(plugin) => plugin,
            Err(e) => {
                error!(plugin = %name, error = %format!("{:#}", e), "入口点构造失败");
                context.tasks().cancel();
                namespace.close();
                return Err(PluginError::EntryPointConstructionFailure {
                    plugin: name.to_string(),
                    source: e,
                });
            }
        };

        // 5. 实例
        Ok(Arc::new(PluginInstance::new(context, plugin, self.name.clone())))
    }

    /// 启用实例
    ///
    /// 只有 `Loaded` 状态的实例会调用 `on_enable`，并发调用只有一个生效。
    /// 钩子失败时记录错误并保持 `Loaded`。
    pub async fn enable(&self, instance: &Arc<PluginInstance>) {
        if !instance.transition(raw::LOADED, raw::ENABLING) {
            debug!(plugin = %instance.name(), state = %instance.state(), "跳过启用");
            return;
        }

        let context = instance.context();
        context.tasks().renew();

        let span = context.span().clone();
        match instance.plugin().on_enable(context).instrument(span).await {
            Ok(()) => {
                if instance.transition(raw::ENABLING, raw::ENABLED) {
                    self.env.emit(PluginEventKind::Enabled, instance.name(), &self.name);
                    info!(loader = %self.name, plugin = %instance.name(), "插件已启用");
                } else {
                    // 启用期间被卸载
                    context.tasks().cancel();
                    warn!(plugin = %instance.name(), "插件在启用过程中被卸载");
                }
            }
            Err(e) => {
                context.tasks().cancel();
                instance.transition(raw::ENABLING, raw::LOADED);
                error!(plugin = %instance.name(), error = %format!("{:#}", e), "插件启用失败");
            }
        }
    }

    /// 禁用实例
    ///
    /// 只有 `Enabled` 状态的实例会调用 `on_disable`。钩子返回后取消后台任务，
    /// 钩子失败只记录，实例仍回到 `Loaded`。
    pub async fn disable(&self, instance: &Arc<PluginInstance>) {
        if !instance.transition(raw::ENABLED, raw::DISABLING) {
            debug!(plugin = %instance.name(), state = %instance.state(), "跳过禁用");
            return;
        }

        let context = instance.context();
        let span = context.span().clone();
        if let Err(e) = instance.plugin().on_disable(context).instrument(span).await {
            error!(plugin = %instance.name(), error = %format!("{:#}", e), "插件禁用钩子失败");
        }
        context.tasks().cancel();

        if instance.transition(raw::DISABLING, raw::LOADED) {
            self.env.emit(PluginEventKind::Disabled, instance.name(), &self.name);
            info!(loader = %self.name, plugin = %instance.name(), "插件已禁用");
        }
    }

    /// 卸载实例
    ///
    /// 从持有集合中移除后禁用、关闭命名空间并标记为 `Unloaded`。
    /// 不在持有集合中的实例（含已卸载的）无操作。
    pub async fn unload(&self, instance: &Arc<PluginInstance>) {
        let removed = {
            let mut plugins = self.plugins.write();
            match plugins.iter().position(|p| Arc::ptr_eq(p, instance)) {
                Some(index) => {
                    plugins.remove(index);
                    true
                }
                None => false,
            }
        };
        if !removed {
            debug!(plugin = %instance.name(), "实例不属于本加载器或已卸载");
            return;
        }

        self.disable(instance).await;
        instance.context().tasks().cancel();
        instance.context().namespace().close();
        instance.mark_unloaded();
        self.env.emit(PluginEventKind::Unloaded, instance.name(), &self.name);
        info!(loader = %self.name, plugin = %instance.name(), "插件已卸载");
    }

    /// 按加载逆序卸载全部实例
    pub async fn disable_all(&self) {
        let plugins = self.loaded_plugins();
        if plugins.is_empty() {
            return;
        }
        info!(loader = %self.name, count = plugins.len(), "卸载全部插件");
        for instance in plugins.iter().rev() {
            self.unload(instance).await;
        }
    }
}

impl fmt::Debug for LoaderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderCore")
            .field("name", &self.name)
            .field("plugins", &self.plugins.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::description::{PluginKind, PluginMetadata};
    use crate::plugin::instance::PluginState;
    use crate::plugin::namespace::MemorySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        enabled: Arc<AtomicUsize>,
        disabled: Arc<AtomicUsize>,
        fail_enable: bool,
    }

    #[async_trait]
    impl Plugin for Counting {
        async fn on_enable(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.enabled.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail_enable {
                anyhow::bail!("enable refused");
            }
            Ok(())
        }

        async fn on_disable(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingLoad;

    #[async_trait]
    impl Plugin for FailingLoad {
        async fn on_load(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    /// 在 `on_load` 中启动等待取消的后台任务
    struct Background {
        stopped: Arc<AtomicUsize>,
        fail_load: bool,
    }

    #[async_trait]
    impl Plugin for Background {
        async fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()> {
            let stopped = self.stopped.clone();
            ctx.spawn(move |token| async move {
                token.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
            if self.fail_load {
                anyhow::bail!("load refused");
            }
            Ok(())
        }
    }

    fn register_background(table: &EntryPointTable, key: &str, fail_load: bool) -> Arc<AtomicUsize> {
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();
        table.register(key, move |_| {
            Ok(Box::new(Background {
                stopped: counter.clone(),
                fail_load,
            }) as Box<dyn Plugin>)
        });
        stopped
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while counter.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    struct Fixture {
        core: LoaderCore,
        enabled: Arc<AtomicUsize>,
        disabled: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let env = PluginEnvironment::new(dir.path(), 16);
        let table = EntryPointTable::new();
        let enabled = Arc::new(AtomicUsize::new(0));
        let disabled = Arc::new(AtomicUsize::new(0));
        {
            let (enabled, disabled) = (enabled.clone(), disabled.clone());
            table.register("demo.Counting", move |_| {
                Ok(Box::new(Counting {
                    enabled: enabled.clone(),
                    disabled: disabled.clone(),
                    fail_enable: false,
                }) as Box<dyn Plugin>)
            });
        }
        table.register("demo.Refuse", |_| {
            Ok(Box::new(Counting {
                fail_enable: true,
                ..Default::default()
            }) as Box<dyn Plugin>)
        });
        table.register("demo.FailingLoad", |_| Ok(Box::new(FailingLoad) as Box<dyn Plugin>));
        Fixture {
            core: LoaderCore::new("test", env, table),
            enabled,
            disabled,
            _dir: dir,
        }
    }

    fn desc(metadata: PluginMetadata) -> (PluginDescription, Box<dyn SymbolSource>) {
        let location = SourceLocation::Builtin(metadata.name.clone());
        let description = PluginDescription::new(metadata, location.clone()).unwrap();
        (description, Box::new(MemorySource::new(location)))
    }

    #[tokio::test]
    async fn test_load_and_lifecycle() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        let mut events = f.core.env().subscribe();

        let instance = f.core.load(&d, s).await.unwrap();
        assert_eq!(instance.state(), PluginState::Loaded);
        assert_eq!(events.recv().await.unwrap().kind, PluginEventKind::Loaded);

        f.core.enable(&instance).await;
        f.core.enable(&instance).await;
        assert_eq!(instance.state(), PluginState::Enabled);
        assert_eq!(f.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(events.recv().await.unwrap().kind, PluginEventKind::Enabled);

        f.core.disable(&instance).await;
        f.core.disable(&instance).await;
        assert_eq!(instance.state(), PluginState::Loaded);
        assert_eq!(f.disabled.load(Ordering::SeqCst), 1);

        f.core.enable(&instance).await;
        assert_eq!(f.enabled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_enable_runs_hook_once() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        let instance = f.core.load(&d, s).await.unwrap();

        futures::future::join_all((0..8).map(|_| f.core.enable(&instance))).await;

        assert_eq!(f.enabled.load(Ordering::SeqCst), 1);
        assert!(instance.is_enabled());
    }

    #[tokio::test]
    async fn test_already_loaded() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        f.core.load(&d, s).await.unwrap();

        let (_, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        assert!(matches!(
            f.core.load(&d, s).await,
            Err(PluginError::AlreadyLoaded(name)) if name == "a"
        ));
        assert_eq!(f.core.loaded_plugins().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_dependency() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("b", "demo.Counting").depends_on("a"));
        match f.core.load(&d, s).await {
            Err(PluginError::MissingDependency { plugin, dependency }) => {
                assert_eq!(plugin, "b");
                assert_eq!(dependency, "a");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(f.core.arena().is_empty());

        let (d, s) = desc(PluginMetadata::new("c", "demo.Counting").soft_depends_on("a"));
        assert!(f.core.load(&d, s).await.is_ok());
    }

    #[tokio::test]
    async fn test_entry_point_failures_release_namespace() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("x", "demo.Unknown"));
        assert!(matches!(
            f.core.load(&d, s).await,
            Err(PluginError::EntryPointConstructionFailure { .. })
        ));

        let (d, s) = desc(PluginMetadata::new("y", "demo.FailingLoad"));
        assert!(matches!(
            f.core.load(&d, s).await,
            Err(PluginError::EntryPointConstructionFailure { .. })
        ));

        assert!(f.core.arena().is_empty());
        assert!(f.core.loaded_plugins().is_empty());

        // 失败后同一来源可以重新加载
        let table = f.core.entry_points().clone();
        table.register_default::<Counting>("demo.FailingLoad");
        let (d, s) = desc(PluginMetadata::new("y", "demo.FailingLoad"));
        assert!(f.core.load(&d, s).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_enable_stays_loaded() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("r", "demo.Refuse").with_kind(PluginKind::Normal));
        let instance = f.core.load(&d, s).await.unwrap();

        f.core.enable(&instance).await;
        assert_eq!(instance.state(), PluginState::Loaded);
        assert!(instance.context().tasks().is_cancelled());
    }

    #[tokio::test]
    async fn test_unload_twice_is_noop() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        let instance = f.core.load(&d, s).await.unwrap();
        f.core.enable(&instance).await;

        let mut events = f.core.env().subscribe();
        f.core.unload(&instance).await;
        f.core.unload(&instance).await;

        assert_eq!(instance.state(), PluginState::Unloaded);
        assert_eq!(f.disabled.load(Ordering::SeqCst), 1);
        assert!(instance.context().namespace().is_closed());
        assert!(f.core.loaded_plugins().is_empty());

        assert_eq!(events.recv().await.unwrap().kind, PluginEventKind::Disabled);
        assert_eq!(events.recv().await.unwrap().kind, PluginEventKind::Unloaded);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disable_cancels_background_tasks() {
        let f = fixture();
        let (d, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        let instance = f.core.load(&d, s).await.unwrap();
        f.core.enable(&instance).await;

        let handle = instance.context().spawn(|token| async move {
            token.cancelled().await;
        });
        f.core.disable(&instance).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        f.core.enable(&instance).await;
        assert!(!instance.context().tasks().is_cancelled());
    }

    #[tokio::test]
    async fn test_disable_all_unloads_everything() {
        let f = fixture();
        let (a, s) = desc(PluginMetadata::new("a", "demo.Counting"));
        let a = f.core.load(&a, s).await.unwrap();
        let (b, s) = desc(PluginMetadata::new("b", "demo.Counting").depends_on("a"));
        let b = f.core.load(&b, s).await.unwrap();
        f.core.enable(&a).await;
        f.core.enable(&b).await;

        f.core.disable_all().await;

        assert!(f.core.loaded_plugins().is_empty());
        assert_eq!(a.state(), PluginState::Unloaded);
        assert_eq!(b.state(), PluginState::Unloaded);
        assert_eq!(f.disabled.load(Ordering::SeqCst), 2);
        assert!(f.core.arena().is_empty());
    }

    #[tokio::test]
    async fn test_unload_without_enable_cancels_load_tasks() {
        let f = fixture();
        let stopped = register_background(f.core.entry_points(), "demo.Background", false);
        let (d, s) = desc(PluginMetadata::new("bg", "demo.Background"));
        let instance = f.core.load(&d, s).await.unwrap();
        assert_eq!(instance.context().tasks().active_tasks(), 1);

        f.core.unload(&instance).await;

        assert_eq!(instance.state(), PluginState::Unloaded);
        assert!(instance.context().tasks().is_cancelled());
        wait_for(&stopped, 1).await;
    }

    #[tokio::test]
    async fn test_failed_load_cancels_spawned_tasks() {
        let f = fixture();
        let stopped = register_background(f.core.entry_points(), "demo.BackgroundFails", true);
        let (d, s) = desc(PluginMetadata::new("bg", "demo.BackgroundFails"));

        assert!(matches!(
            f.core.load(&d, s).await,
            Err(PluginError::EntryPointConstructionFailure { .. })
        ));
        wait_for(&stopped, 1).await;
        assert!(f.core.arena().is_empty());
    }
}
