//! 插件依赖解析
//!
//! 把一个无序的插件描述集合排成加载顺序：每个描述的依赖都严格排在它之前。
//!
//! # 示例
//!
//! ```rust
//! use plugin_host::plugin::{DependencyResolver, PluginDescription, PluginMetadata, SourceLocation};
//!
//! let core = PluginDescription::new(
//!     PluginMetadata::new("core", "core.Main"),
//!     SourceLocation::Builtin("core".into()),
//! ).unwrap();
//! let ext = PluginDescription::new(
//!     PluginMetadata::new("ext", "ext.Main").depends_on("core"),
//!     SourceLocation::Builtin("ext".into()),
//! ).unwrap();
//!
//! let order = DependencyResolver::resolve(&[ext, core]).unwrap();
//! let names: Vec<_> = order.iter().map(|d| d.name()).collect();
//! assert_eq!(names, vec!["core", "ext"]);
//! ```

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::plugin::description::PluginDescription;
use crate::utils::{PluginError, Result};

/// 依赖解析器
///
/// 无状态：每次调用只依赖传入的描述集合。
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

/// 单次解析的工作状态
struct Resolution<'a> {
    /// 已排好序的输出
    output: Vec<PluginDescription>,
    /// 尚未输出的描述：名称 -> 描述
    remaining: HashMap<&'a str, &'a PluginDescription>,
    /// 输入中出现过的全部名称
    known: HashSet<&'a str>,
    /// 当前递归栈上的名称（有序）
    in_progress: Vec<&'a str>,
}

impl DependencyResolver {
    /// 解析加载顺序
    ///
    /// 相互独立的描述保持输入中的相对顺序。同名描述只保留第一个。
    ///
    /// # 错误
    ///
    /// - `PluginError::CyclicDependency` - 依赖链重新访问了正在解析的名称
    /// - `PluginError::UnknownRequiredDependency` - 必需依赖不在输入集合中
    pub fn resolve(descriptions: &[PluginDescription]) -> Result<Vec<PluginDescription>> {
        let mut state = Resolution {
            output: Vec::with_capacity(descriptions.len()),
            remaining: HashMap::with_capacity(descriptions.len()),
            known: HashSet::with_capacity(descriptions.len()),
            in_progress: Vec::new(),
        };

        let mut roots: Vec<&str> = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let name = description.name();
            if state.remaining.contains_key(name) {
                warn!(plugin = %name, source = %description.source(), "重复的插件名称，已忽略");
                continue;
            }
            state.remaining.insert(name, description);
            state.known.insert(name);
            roots.push(name);
        }

        for name in roots {
            if state.remaining.contains_key(name) {
                state.visit(name, false)?;
            }
        }

        Ok(state.output)
    }
}

impl<'a> Resolution<'a> {
    fn visit(&mut self, name: &'a str, optional: bool) -> Result<()> {
        if self.in_progress.contains(&name) {
            let mut chain: Vec<String> = self.in_progress.iter().map(|n| n.to_string()).collect();
            chain.push(name.to_string());
            return Err(PluginError::CyclicDependency { chain });
        }

        let description = match self.remaining.get(name) {
            Some(description) => *description,
            None => {
                // 已输出的，或（可选时）完全未知的名称，都视为已满足
                if !optional && !self.known.contains(name) {
                    let plugin = self.in_progress.last().copied().unwrap_or(name);
                    return Err(PluginError::UnknownRequiredDependency {
                        plugin: plugin.to_string(),
                        dependency: name.to_string(),
                    });
                }
                return Ok(());
            }
        };

        self.in_progress.push(name);
        for dependency in description.dependencies() {
            self.visit(dependency.name.as_str(), dependency.optional)?;
        }
        self.output.push(description.clone());
        self.remaining.remove(name);
        self.in_progress.pop();

        Ok(())
    }
}
