use std::sync::Arc;

use tokio::{sync::Notify, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::persistence::WorkQueue;
use crate::policy::{WaitContext, WaitDecision, WaitStrategy};

/// 拉取起搏器
///
/// 核心职责：负责驱动拉取协程的节奏。
/// 它根据 WaitStrategy 的决策，结合队列里最近一个延时 Key 的到期时间，
/// 决定是立刻拉取、监听信号还是休眠。
pub struct Pacemaker<'a> {
    /// 队列 (读取 next_due)
    queue: &'a dyn WorkQueue,

    /// 新 Key 就绪通知
    notify: Arc<Notify>,

    /// 关机信号
    shutdown: &'a CancellationToken,

    /// 等待策略
    wait_strategy: Arc<dyn WaitStrategy>,

    /// 连续空闲计数器
    idle_count: u32,
}

impl<'a> Pacemaker<'a> {
    pub fn new(
        queue: &'a dyn WorkQueue,
        shutdown: &'a CancellationToken,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        Self {
            notify: queue.notifier(),
            queue,
            shutdown,
            wait_strategy,
            idle_count: 0,
        }
    }

    /// 当成功拉取到 Key 时调用
    pub fn mark_busy(&mut self) {
        self.idle_count = 0;
    }

    /// 当没有拉取到 Key 时调用
    pub fn mark_idle(&mut self) {
        self.idle_count = self.idle_count.saturating_add(1);
    }

    pub fn idle_count(&self) -> u32 {
        self.idle_count
    }

    /// 把策略决策与队列的延时到期时间合并
    ///
    /// 延时 Key 到期必须能唤醒协程，所以软等待的截止时间不晚于 `next_due`。
    fn merge_due(decision: WaitDecision, next_due: Option<Instant>) -> WaitDecision {
        let Some(due) = next_due else {
            return decision;
        };
        match decision {
            WaitDecision::WaitForNotification(deadline) => {
                WaitDecision::WaitForNotification(deadline.min(due))
            }
            WaitDecision::WaitIndefinitely => WaitDecision::WaitForNotification(due),
            other => other,
        }
    }

    /// 等待下一次动作触发
    pub async fn wait_next(&mut self) -> PacemakerEvent {
        // 1. 检查 Shutdown (非阻塞)
        if self.shutdown.is_cancelled() {
            return PacemakerEvent::Shutdown;
        }

        // 2. 获取策略决策
        let ctx = WaitContext::new(self.idle_count, Instant::now());
        let decision = Self::merge_due(
            self.wait_strategy.make_decision(&ctx),
            self.queue.next_due(),
        );

        // 3. 执行决策
        match decision {
            WaitDecision::Immediate => PacemakerEvent::Trigger,
            WaitDecision::Yield => {
                tokio::task::yield_now().await;
                PacemakerEvent::Trigger
            }
            // 硬等待：不管有没有信号，必须睡到这个点
            WaitDecision::WaitUntil(deadline) => {
                tokio::select! {
                    _ = self.shutdown.cancelled() => PacemakerEvent::Shutdown,
                    _ = tokio::time::sleep_until(deadline) => PacemakerEvent::Trigger,
                }
            }
            // 软等待：允许被 Notify 唤醒
            WaitDecision::WaitForNotification(deadline) => {
                tokio::select! {
                    _ = self.shutdown.cancelled() => PacemakerEvent::Shutdown,
                    _ = self.notify.notified() => PacemakerEvent::Trigger,
                    _ = tokio::time::sleep_until(deadline) => PacemakerEvent::Trigger,
                }
            }
            WaitDecision::WaitIndefinitely => {
                tokio::select! {
                    _ = self.shutdown.cancelled() => PacemakerEvent::Shutdown,
                    _ = self.notify.notified() => PacemakerEvent::Trigger,
                }
            }
        }
    }
}

/// 起搏器产生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacemakerEvent {
    /// [触发] 可能有 Key 就绪，请立即去拉取
    Trigger,
    /// [关闭] 系统停机
    Shutdown,
}
