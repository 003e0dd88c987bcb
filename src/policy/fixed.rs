use std::time::Duration;

use crate::policy::{WaitContext, WaitDecision, WaitStrategy};

/// 固定间隔策略
///
/// - 无论忙闲，都保持固定的节奏。
/// - 支持配置为“监听通知”或“纯轮询”。
#[derive(Debug, Clone)]
pub struct FixedWait {
    interval: Duration,
    listen: bool,
}

impl FixedWait {
    /// 混合模式: 监听通知，超时时间为 `millis`
    pub fn new(millis: u64) -> Self {
        Self {
            interval: Duration::from_millis(millis),
            listen: true,
        }
    }

    /// 纯轮询策略 (忽略通知)
    pub fn new_pure_polling(millis: u64) -> Self {
        Self {
            interval: Duration::from_millis(millis),
            listen: false,
        }
    }
}

impl WaitStrategy for FixedWait {
    fn make_decision(&self, ctx: &WaitContext) -> WaitDecision {
        let deadline = ctx.now_instant + self.interval;
        if self.listen {
            WaitDecision::WaitForNotification(deadline)
        } else {
            WaitDecision::WaitUntil(deadline)
        }
    }
}
