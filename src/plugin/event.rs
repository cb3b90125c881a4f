//! 插件生命周期事件
//!
//! 加载器在每次状态转换后发布事件，命令框架、设置层等协作方通过
//! [`crate::plugin::PluginManager::subscribe`] 订阅。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginEventKind {
    /// 已加载
    Loaded,
    /// 已启用
    Enabled,
    /// 已禁用
    Disabled,
    /// 已卸载
    Unloaded,
}

/// 生命周期事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    /// 事件类型
    pub kind: PluginEventKind,
    /// 插件名称
    pub plugin: String,
    /// 所属加载器名称
    pub loader: String,
    /// 发生时间
    pub timestamp: DateTime<Utc>,
}

impl PluginEvent {
    /// 创建事件
    pub fn new(kind: PluginEventKind, plugin: impl Into<String>, loader: impl Into<String>) -> Self {
        Self {
            kind,
            plugin: plugin.into(),
            loader: loader.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = PluginEvent::new(PluginEventKind::Enabled, "core", "archive");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "enabled");
        assert_eq!(json["plugin"], "core");
        assert_eq!(json["loader"], "archive");
    }
}
