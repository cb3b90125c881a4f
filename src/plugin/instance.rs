//! 插件实例
//!
//! 一个实例对应一次成功的加载，持有描述、隔离命名空间、钩子对象和后台任务组。
//! 状态只在 `Unloaded -> Loaded <-> Enabled -> Unloaded` 之间转换，
//! 转换由所属加载器驱动，实例本身只提供原子的状态检查与切换。

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument, Span};

use crate::plugin::description::PluginDescription;
use crate::plugin::namespace::{Namespace, Symbol};
use crate::utils::Result;

/// 插件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// 已卸载，命名空间已释放
    Unloaded,
    /// 已加载，未启用
    Loaded,
    /// 已启用
    Enabled,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Unloaded => write!(f, "unloaded"),
            PluginState::Loaded => write!(f, "loaded"),
            PluginState::Enabled => write!(f, "enabled"),
        }
    }
}

/// 内部状态编码，包含两个转换中的中间态
pub(crate) mod raw {
    pub const UNLOADED: u8 = 0;
    pub const LOADED: u8 = 1;
    pub const ENABLING: u8 = 2;
    pub const ENABLED: u8 = 3;
    pub const DISABLING: u8 = 4;
}

/// 插件钩子
///
/// 由入口点工厂构造。所有钩子都有空的默认实现。
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 加载完成后调用一次，失败时整个加载失败
    async fn on_load(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 每次启用时调用
    async fn on_enable(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// 每次禁用时调用，返回后后台任务被取消
    async fn on_disable(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 插件后台任务组
///
/// 禁用时取消当前令牌；再次启用前若令牌已取消，换上新的令牌。
#[derive(Debug, Default)]
pub struct TaskGroup {
    token: Mutex<CancellationToken>,
    active: Arc<AtomicUsize>,
}

/// 任务结束（含被中止）时递减计数
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TaskGroup {
    /// 当前令牌
    pub fn token(&self) -> CancellationToken {
        self.token.lock().clone()
    }

    /// 当前令牌是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.token.lock().is_cancelled()
    }

    /// 在当前令牌下启动后台任务
    pub fn spawn<F, Fut>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(self.active.clone());
        let future = task(self.token());
        tokio::spawn(
            async move {
                let _guard = guard;
                future.await;
            }
            .in_current_span(),
        )
    }

    /// 仍在运行的任务数
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// 取消当前令牌
    pub(crate) fn cancel(&self) {
        self.token.lock().cancel();
    }

    /// 令牌已取消时换上新的
    pub(crate) fn renew(&self) {
        let mut token = self.token.lock();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// 插件运行上下文
///
/// 钩子通过它访问自身命名空间、数据目录和后台任务组。
pub struct PluginContext {
    description: PluginDescription,
    namespace: Arc<Namespace>,
    data_dir: PathBuf,
    data_dir_ready: OnceLock<()>,
    tasks: TaskGroup,
    span: Span,
}

impl PluginContext {
    pub(crate) fn new(
        description: PluginDescription,
        namespace: Arc<Namespace>,
        data_root: &Path,
        span: Span,
    ) -> Self {
        let data_dir = data_root.join(description.name());
        Self {
            description,
            namespace,
            data_dir,
            data_dir_ready: OnceLock::new(),
            tasks: TaskGroup::default(),
            span,
        }
    }

    /// 插件描述
    pub fn description(&self) -> &PluginDescription {
        &self.description
    }

    /// 插件名称
    pub fn name(&self) -> &str {
        self.description.name()
    }

    /// 插件命名空间
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// 全局查找符号
    pub fn find_symbol(&self, name: &str) -> Result<Symbol> {
        self.namespace.find(name)
    }

    /// 插件数据目录 `<data_root>/<name>`，首次访问时创建
    pub fn data_dir(&self) -> Result<&Path> {
        if self.data_dir_ready.get().is_none() {
            std::fs::create_dir_all(&self.data_dir)?;
            let _ = self.data_dir_ready.set(());
            debug!(plugin = %self.name(), path = %self.data_dir.display(), "数据目录已创建");
        }
        Ok(&self.data_dir)
    }

    /// 插件专属的 tracing span
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// 后台任务组
    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// 启动随插件禁用而取消的后台任务
    pub fn spawn<F, Fut>(&self, task: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _entered = self.span.enter();
        self.tasks.spawn(task)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.name())
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

/// 已加载的插件实例
pub struct PluginInstance {
    context: PluginContext,
    plugin: Box<dyn Plugin>,
    loader: Arc<str>,
    state: AtomicU8,
    loaded_at: DateTime<Utc>,
}

impl PluginInstance {
    pub(crate) fn new(context: PluginContext, plugin: Box<dyn Plugin>, loader: Arc<str>) -> Self {
        Self {
            context,
            plugin,
            loader,
            state: AtomicU8::new(raw::LOADED),
            loaded_at: Utc::now(),
        }
    }

    /// 插件描述
    pub fn description(&self) -> &PluginDescription {
        self.context.description()
    }

    /// 插件名称
    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// 所属加载器名称
    pub fn loader_name(&self) -> &str {
        &self.loader
    }

    /// 运行上下文
    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    /// 加载时间
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// 当前状态
    ///
    /// 启用中的实例视为 `Loaded`，禁用中的实例视为 `Enabled`。
    pub fn state(&self) -> PluginState {
        match self.state.load(Ordering::Acquire) {
            raw::UNLOADED => PluginState::Unloaded,
            raw::LOADED | raw::ENABLING => PluginState::Loaded,
            _ => PluginState::Enabled,
        }
    }

    /// 是否已启用
    pub fn is_enabled(&self) -> bool {
        self.state() == PluginState::Enabled
    }

    pub(crate) fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    pub(crate) fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_unloaded(&self) {
        self.state.store(raw::UNLOADED, Ordering::Release);
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name())
            .field("version", &self.description().version())
            .field("loader", &self.loader)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::description::{PluginMetadata, SourceLocation};
    use crate::plugin::namespace::{MemorySource, NamespaceArena};
    use std::time::Duration;

    struct Noop;

    impl Plugin for Noop {}

    fn instance(data_root: &Path) -> PluginInstance {
        let source = SourceLocation::Builtin("demo".into());
        let description =
            PluginDescription::new(PluginMetadata::new("demo", "demo.Main"), source.clone()).unwrap();
        let arena = NamespaceArena::new();
        let namespace = arena.create("demo", Box::new(MemorySource::new(source)));
        let context = PluginContext::new(description, namespace, data_root, Span::none());
        PluginInstance::new(context, Box::new(Noop), Arc::from("test"))
    }

    #[test]
    fn test_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let instance = instance(dir.path());
        assert_eq!(instance.state(), PluginState::Loaded);

        assert!(instance.transition(raw::LOADED, raw::ENABLING));
        assert_eq!(instance.state(), PluginState::Loaded);
        assert!(!instance.transition(raw::LOADED, raw::ENABLING));

        assert!(instance.transition(raw::ENABLING, raw::ENABLED));
        assert!(instance.is_enabled());

        instance.mark_unloaded();
        assert_eq!(instance.state(), PluginState::Unloaded);
    }

    #[test]
    fn test_data_dir_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let instance = instance(dir.path());
        let expected = dir.path().join("demo");
        assert!(!expected.exists());

        let path = instance.context().data_dir().unwrap().to_path_buf();
        assert_eq!(path, expected);
        assert!(expected.is_dir());
    }

    #[tokio::test]
    async fn test_task_group_cancel_and_renew() {
        let group = TaskGroup::default();
        let handle = group.spawn(|token| async move {
            token.cancelled().await;
        });
        assert_eq!(group.active_tasks(), 1);

        group.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(group.is_cancelled());
        assert_eq!(group.active_tasks(), 0);

        group.renew();
        assert!(!group.is_cancelled());
    }
}
