use crate::models::GroupEvent;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

/// 分组事件订阅方；投递为至少一次，实现方按 (group_id, version) 去重
pub trait GroupEventSink: Send + Sync {
    fn publish(&self, event: &GroupEvent);
}

/// 写入日志
#[derive(Debug, Default)]
pub struct TracingSink;

impl GroupEventSink for TracingSink {
    fn publish(&self, event: &GroupEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!("[Event] {}", json),
            Err(e) => tracing::warn!("[Event] 序列化失败: {} ({:?})", e, event),
        }
    }
}

/// 广播给进程内订阅者 (如审核端推送)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<GroupEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.sender.subscribe()
    }
}

impl GroupEventSink for ChannelSink {
    fn publish(&self, event: &GroupEvent) {
        // 无订阅者时发送失败可忽略
        let _ = self.sender.send(event.clone());
    }
}

/// 内存收集，测试用
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GroupEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GroupEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GroupEventSink for RecordingSink {
    fn publish(&self, event: &GroupEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
