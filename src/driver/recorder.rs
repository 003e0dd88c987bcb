use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::common::Clock;
use crate::common::model::ObjectKey;

/// 事件级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Normal,
    Warning,
}

/// 事件原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventReason {
    /// 创建了新实例
    TriggerFired,
    /// Forbid 策略下跳过了触发
    TriggerSkippedForbidden,
    /// Replace 策略下终止了旧实例
    InstanceReplaced,
    /// 历史实例被清理
    HistoryDeleted,
    /// 触发表达式无效
    InvalidExpression,
    /// 孤儿实例被清扫
    OrphanDeleted,
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub severity: Severity,
    pub reason: EventReason,
    pub message: String,
}

impl Event {
    pub fn normal(reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Normal,
            reason,
            message: message.into(),
        }
    }

    pub fn warning(reason: EventReason, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            reason,
            message: message.into(),
        }
    }
}

/// 事件接收端
///
/// 真正的后端 (例如写回 API Server) 在引擎之外实现。记录失败不影响调度。
pub trait EventRecorder: Send + Sync + 'static {
    fn record(&self, object: &ObjectKey, event: Event);
}

// ==========================================
// 默认实现: 走 tracing
// ==========================================

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &ObjectKey, event: Event) {
        match event.severity {
            Severity::Normal => info!(
                object = %object,
                reason = %event.reason,
                "[Event] {}",
                event.message
            ),
            Severity::Warning => warn!(
                object = %object,
                reason = %event.reason,
                "[Event] {}",
                event.message
            ),
        }
    }
}

// ==========================================
// 内存实现: 收集起来供检查
// ==========================================

/// 已记录的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    pub object: ObjectKey,
    pub event: Event,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            clock,
        }
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// 某个对象上某类事件的数量
    pub fn count(&self, object: &ObjectKey, reason: EventReason) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.object == object && e.event.reason == reason)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &ObjectKey, event: Event) {
        self.events.lock().push(RecordedEvent {
            object: object.clone(),
            event,
            at: self.clock.now(),
        });
    }
}

impl fmt::Debug for MemoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecorder")
            .field("events", &self.events.lock().len())
            .finish()
    }
}
