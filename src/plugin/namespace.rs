//! 隔离命名空间
//!
//! 每个插件实例在加载时获得一个独占的命名空间，绑定到唯一的插件包。
//! 命名空间提供两种查找方式：
//!
//! - 本地查找（[`Namespace::find_local`]）：只在自身包内解析，按名称加锁防止同一符号被并发重复定义
//! - 全局查找（[`Namespace::find`]）：本地未命中时，按注册顺序依次在同一 [`NamespaceArena`]
//!   中的其它命名空间做本地查找，返回第一个命中
//!
//! 全局查找在互不相关的插件之间没有确定的优先级，跨插件共享的符号应当全局唯一命名。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::plugin::description::SourceLocation;
use crate::utils::{PluginError, Result};

/// 插件包内容的读取接口
///
/// 每种包格式各自实现，命名空间只通过它读取原始内容。
pub trait SymbolSource: Send + Sync + fmt::Debug {
    /// 包的来源
    fn location(&self) -> &SourceLocation;

    /// 读取包内名为 `name` 的条目，不存在时返回 `Ok(None)`
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// 内存中的插件包内容
#[derive(Debug, Clone)]
pub struct MemorySource {
    location: SourceLocation,
    entries: HashMap<String, Arc<[u8]>>,
}

impl MemorySource {
    /// 创建空的内存包
    pub fn new(location: SourceLocation) -> Self {
        Self {
            location,
            entries: HashMap::new(),
        }
    }

    /// 添加条目
    pub fn with_entry(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        self.entries.insert(name.into(), Arc::from(data));
        self
    }
}

impl SymbolSource for MemorySource {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(name).map(|data| data.to_vec()))
    }
}

/// 已解析的符号句柄
///
/// 所属命名空间关闭后句柄随之失效。
#[derive(Clone)]
pub struct Symbol {
    name: Arc<str>,
    owner: Arc<str>,
    data: Arc<[u8]>,
    closed: Arc<AtomicBool>,
}

impl Symbol {
    /// 符号名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 定义该符号的插件名称
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 句柄是否仍然有效
    pub fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// 原始内容
    pub fn bytes(&self) -> Result<&[u8]> {
        if !self.is_valid() {
            return Err(PluginError::NamespaceClosed(self.owner.to_string()));
        }
        Ok(&self.data)
    }

    /// 按 UTF-8 文本读取内容
    pub fn as_str(&self) -> Result<&str> {
        let bytes = self.bytes()?;
        std::str::from_utf8(bytes).map_err(|e| {
            PluginError::Other(anyhow::anyhow!("符号 '{}' 不是有效的 UTF-8: {}", self.name, e))
        })
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("len", &self.data.len())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// 隔离命名空间
pub struct Namespace {
    owner: Arc<str>,
    source: Box<dyn SymbolSource>,
    /// 已定义的符号缓存
    defined: Mutex<HashMap<String, Symbol>>,
    /// 按名称的定义锁
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    closed: Arc<AtomicBool>,
    arena: Weak<NamespaceArena>,
}

impl Namespace {
    /// 拥有该命名空间的插件名称
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 绑定的插件包来源
    pub fn location(&self) -> &SourceLocation {
        self.source.location()
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 只在自身包内解析符号
    ///
    /// # 错误
    ///
    /// - `PluginError::NamespaceClosed` - 命名空间已关闭
    /// - `PluginError::SymbolNotFound` - 包内没有该条目
    pub fn find_local(&self, name: &str) -> Result<Symbol> {
        if self.is_closed() {
            return Err(PluginError::NamespaceClosed(self.owner.to_string()));
        }

        let lock = self.lock_for(name);
        let _guard = lock.lock();

        if let Some(symbol) = self.defined.lock().get(name) {
            return Ok(symbol.clone());
        }

        let data = match self.source.read(name) {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.name_locks.lock().remove(name);
                return Err(PluginError::SymbolNotFound(name.to_string()));
            }
            Err(e) => {
                self.name_locks.lock().remove(name);
                return Err(e);
            }
        };

        // 读取期间可能被关闭
        if self.is_closed() {
            return Err(PluginError::NamespaceClosed(self.owner.to_string()));
        }

        let symbol = Symbol {
            name: Arc::from(name),
            owner: self.owner.clone(),
            data: Arc::from(data),
            closed: self.closed.clone(),
        };
        self.defined.lock().insert(name.to_string(), symbol.clone());
        trace!(plugin = %self.owner, symbol = %name, "符号已定义");
        Ok(symbol)
    }

    /// 先本地查找，未命中时按注册顺序查找兄弟命名空间
    pub fn find(&self, name: &str) -> Result<Symbol> {
        match self.find_local(name) {
            Err(PluginError::SymbolNotFound(_)) => {}
            other => return other,
        }

        if let Some(arena) = self.arena.upgrade() {
            for sibling in arena.snapshot() {
                if std::ptr::eq(Arc::as_ptr(&sibling), self) {
                    continue;
                }
                if let Ok(symbol) = sibling.find_local(name) {
                    debug!(plugin = %self.owner, symbol = %name, from = %sibling.owner, "符号由兄弟命名空间提供");
                    return Ok(symbol);
                }
            }
        }

        Err(PluginError::SymbolNotFound(name.to_string()))
    }

    /// 关闭命名空间
    ///
    /// 所有已解析的句柄失效，之后的本地查找返回 `NamespaceClosed`。重复调用无副作用。
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.defined.lock().clear();
        self.name_locks.lock().clear();
        if let Some(arena) = self.arena.upgrade() {
            arena.remove(self);
        }
        debug!(plugin = %self.owner, source = %self.location(), "命名空间已关闭");
    }

    #[cfg(test)]
    fn pending_locks(&self) -> usize {
        self.name_locks.lock().len()
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.name_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("owner", &self.owner)
            .field("location", self.location())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 命名空间集合
///
/// 按注册顺序保存同一加载器下所有存活的命名空间，是全局查找的唯一共享点。
#[derive(Debug, Default)]
pub struct NamespaceArena {
    namespaces: RwLock<Vec<Arc<Namespace>>>,
}

impl NamespaceArena {
    /// 创建空集合
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 为插件创建并登记新的命名空间
    pub fn create(
        self: &Arc<Self>,
        owner: impl Into<Arc<str>>,
        source: Box<dyn SymbolSource>,
    ) -> Arc<Namespace> {
        let namespace = Arc::new(Namespace {
            owner: owner.into(),
            source,
            defined: Mutex::new(HashMap::new()),
            name_locks: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicBool::new(false)),
            arena: Arc::downgrade(self),
        });
        self.namespaces.write().push(namespace.clone());
        namespace
    }

    /// 当前存活命名空间的快照（注册顺序）
    pub fn snapshot(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.read().clone()
    }

    /// 存活命名空间数量
    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.namespaces.read().is_empty()
    }

    fn remove(&self, namespace: &Namespace) {
        self.namespaces
            .write()
            .retain(|ns| !std::ptr::eq(Arc::as_ptr(ns), namespace));
    }
}
