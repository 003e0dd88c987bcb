use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::common::config::CascadePolicy;
use crate::common::{ObjectKey, Result, SchedulerError};
use crate::driver::context::DriverContext;
use crate::driver::pacemaker::{Pacemaker, PacemakerEvent};
use crate::driver::plugin::DriverPlugin;
use crate::persistence::{ObjectStore, StoreEvent, WorkQueue};
use crate::policy::{ItemBackoff, WaitStrategy};
use crate::scheduler::{OrphanSweeper, ScheduleReconciler};

/// 驱动器 Inner 结构体
struct DriverInner {
    /// 全局上下文
    ctx: DriverContext,
    /// 单个 Schedule 的协调逻辑
    reconciler: ScheduleReconciler,
    /// 孤儿清扫 (存储不支持原生级联时使用)
    sweeper: OrphanSweeper,
    /// 插件系统
    plugins: Vec<Box<dyn DriverPlugin>>,
    /// 空闲等待策略
    wait_strategy: Arc<dyn WaitStrategy>,
    /// 按 Key 的失败退避
    backoff: ItemBackoff,
}

/// 调度驱动器 (The Engine)
///
/// - N 个拉取协程从工作队列取 Key 并执行 Reconcile。
/// - 一个 Watch 协程把存储变更映射成 Schedule Key 投递进队列。
/// - 一个 Resync 协程周期性全量投递，兜底丢失的通知。
/// - 可选的 Sweep 协程清扫孤儿实例。
#[derive(Clone)]
pub struct ScheduleDriver {
    inner: Arc<DriverInner>,
}

impl ScheduleDriver {
    /// 构造函数
    pub fn new_with_components(
        ctx: DriverContext,
        plugins: Vec<Box<dyn DriverPlugin>>,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        let inner = DriverInner {
            reconciler: ScheduleReconciler::new(ctx.clone()),
            sweeper: OrphanSweeper::new(ctx.clone()),
            ctx,
            plugins,
            wait_strategy,
            backoff: ItemBackoff::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 暴露内部上下文
    pub fn context(&self) -> &DriverContext {
        &self.inner.ctx
    }

    /// 暴露内部存储
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.inner.ctx.store.clone()
    }

    /// 启动引擎 (阻塞直到停机完成)
    pub async fn start(&self) {
        let ctx = &self.inner.ctx;
        // [Hook] 启动
        for p in self.inner.plugins.iter() {
            p.on_start(ctx).await;
        }
        trace!("[Driver-{}] Started.", ctx.node_id);

        // 1. 先订阅再全量投递，避免两者之间的变更丢失
        let events = ctx.store.subscribe();
        self.enqueue_all().await;

        let mut background = JoinSet::new();
        let watcher = self.clone();
        background.spawn(async move { watcher.watch_loop(events).await });

        let resync = self.clone();
        background.spawn(async move { resync.resync_loop().await });

        // 1.1 没有原生级联时由我们来清扫孤儿
        let cascade = &ctx.config.cascade;
        if !ctx.store.supports_cascade()
            && cascade.policy == CascadePolicy::Delete
            && cascade.sweep_interval_secs > 0
        {
            let sweeper = self.clone();
            background.spawn(async move { sweeper.sweep_loop().await });
        }

        // 2. 启动拉取主循环
        let fetcher_count = ctx.config.worker.workers.max(1);
        trace!("[Driver] Spawning {} fetch loops.", fetcher_count);
        let mut fetchers = JoinSet::new();
        for _ in 0..fetcher_count {
            let driver = self.clone();
            fetchers.spawn(async move { driver.fetch_loop().await });
        }

        // 3. 等待停机信号，再给进行中的 Reconcile 一个宽限期
        ctx.shutdown.cancelled().await;
        let grace = Duration::from_secs(ctx.config.policy.shutdown_timeout_secs);
        let drained = tokio::time::timeout(grace, async {
            while let Some(res) = fetchers.join_next().await {
                if let Err(e) = res {
                    error!("[Driver] Fetch loop exited abnormally: {:?}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "[Driver] {} fetch loops still busy after {:?}, aborting.",
                fetchers.len(),
                grace
            );
            fetchers.abort_all();
        }
        background.abort_all();
        while background.join_next().await.is_some() {}

        // [Hook] 关闭
        for p in self.inner.plugins.iter() {
            p.on_shutdown(ctx).await;
        }
        trace!("[Driver-{}] Shutdown complete.", ctx.node_id);
    }

    /// 触发优雅停机
    /// - 所有组件通过 CancellationToken 收到通知
    /// - 队列拒绝新的投递
    pub fn shutdown(&self) {
        trace!("[Driver] Shutdown triggered.");
        self.inner.ctx.shutdown.cancel();
        self.inner.ctx.queue.shutdown();
    }

    /// 把所有 Schedule 投递进队列
    pub async fn enqueue_all(&self) {
        let ctx = &self.inner.ctx;
        match ctx.store.list_schedules(None).await {
            Ok(schedules) => {
                debug!("[Driver] Resync {} schedules.", schedules.len());
                for s in schedules {
                    self.enqueue(s.key()).await;
                }
            }
            Err(e) => warn!("[Driver] Resync list failed: {}", e),
        }
    }

    async fn enqueue(&self, key: ObjectKey) {
        if let Err(e) = self.inner.ctx.queue.add(key.clone()).await {
            match e {
                SchedulerError::SchedulerShutdown => {}
                other => warn!("[Driver] Enqueue {} failed: {}", key, other),
            }
        }
    }

    /// 拉取主循环
    ///
    /// 职责：
    /// 1. 监听起搏器 (Pacemaker) 的信号 (Trigger/Shutdown)。
    /// 2. 从队列取 Key (Acquire)，同一 Key 不会同时出现在两个协程里。
    /// 3. 执行 Reconcile，处理结果并归还 Key。
    async fn fetch_loop(&self) {
        let ctx = &self.inner.ctx;
        let mut pacemaker = Pacemaker::new(
            ctx.queue.as_ref(),
            &ctx.shutdown,
            self.inner.wait_strategy.clone(),
        );
        loop {
            match pacemaker.wait_next().await {
                PacemakerEvent::Trigger => {}
                PacemakerEvent::Shutdown => break,
            }

            let keys = match ctx.queue.acquire(1).await {
                Ok(keys) => keys,
                Err(e) => {
                    error!("[Driver] Acquire failed: {:?}", e);
                    // 遇到错误必须退避，防止错误风暴
                    pacemaker.mark_idle();
                    continue;
                }
            };
            if keys.is_empty() {
                pacemaker.mark_idle();
                continue;
            }
            pacemaker.mark_busy();

            for key in keys {
                self.process_key(&key).await;
                if let Err(e) = ctx.queue.release(&key).await {
                    error!("[Driver] Release {} failed: {:?}", key, e);
                }
            }
        }
        trace!("[Driver] Fetch loop exited.");
    }

    /// 处理单个 Key: 插件钩子 + Panic 隔离 + 重排
    async fn process_key(&self, key: &ObjectKey) {
        let ctx = &self.inner.ctx;
        let cfg = &ctx.config.reconcile;

        // [Hook] 前置检查
        for p in self.inner.plugins.iter() {
            if !p.before_reconcile(key).await {
                debug!("[Driver] Reconcile of {} vetoed by plugin.", key);
                self.requeue(key, Duration::from_millis(cfg.retry_base_delay_ms))
                    .await;
                return;
            }
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(self.inner.reconciler.reconcile(key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic_err| {
                let msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_err.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                error!("[Driver] Reconcile of {} panicked: {}", key, msg);
                Err(SchedulerError::ReconcilePanic(key.clone(), msg))
            });
        let elapsed = started.elapsed();

        // [Hook] 执行后 (无论成功失败)
        for p in self.inner.plugins.iter() {
            p.after_reconcile(key, result.as_ref().err(), elapsed).await;
        }

        let max = Duration::from_millis(cfg.retry_max_delay_ms);
        let delay = match result {
            Ok(outcome) => {
                self.inner.backoff.forget(key);
                outcome.requeue_after
            }
            Err(e) if e.is_conflict() => {
                // 冲突: 状态已变，尽快从新状态重算
                debug!("[Driver] {} conflicted: {}", key, e);
                let base = Duration::from_millis(cfg.conflict_base_delay_ms);
                Some(self.inner.backoff.next_delay(key, base, max))
            }
            Err(e) if e.is_retryable() => {
                let base = Duration::from_millis(cfg.retry_base_delay_ms);
                let delay = self.inner.backoff.next_delay(key, base, max);
                error!(
                    "[Driver] Reconcile of {} failed (attempt {}), retry in {:?}: {}",
                    key,
                    self.inner.backoff.retries(key),
                    delay,
                    e
                );
                Some(delay)
            }
            Err(e) => {
                // 永久性错误: 重试无意义，回到常规节奏等待 Spec 被修正
                error!("[Driver] Reconcile of {} failed permanently: {}", key, e);
                self.inner.backoff.forget(key);
                Some(cfg.gc_recheck_interval())
            }
        };

        if let Some(delay) = delay {
            self.requeue(key, delay).await;
        }
    }

    async fn requeue(&self, key: &ObjectKey, delay: Duration) {
        if let Err(e) = self.inner.ctx.queue.add_after(key.clone(), delay).await {
            match e {
                SchedulerError::SchedulerShutdown => {}
                other => warn!("[Driver] Requeue {} failed: {}", key, other),
            }
        }
    }

    /// Watch 循环: 存储变更 -> 队列
    async fn watch_loop(&self, mut events: broadcast::Receiver<StoreEvent>) {
        let ctx = &self.inner.ctx;
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.enqueue(event.schedule_key()).await,
                    Err(RecvError::Lagged(n)) => {
                        // 丢了通知，无法知道是哪些 Key，只能全量
                        warn!("[Driver] Watch lagged by {} events, resyncing.", n);
                        self.enqueue_all().await;
                    }
                    Err(RecvError::Closed) => {
                        warn!("[Driver] Store event feed closed.");
                        break;
                    }
                },
            }
        }
        trace!("[Driver] Watch loop exited.");
    }

    /// 周期性全量 Resync
    async fn resync_loop(&self) {
        let ctx = &self.inner.ctx;
        let period = Duration::from_secs(ctx.config.worker.resync_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = ticker.tick() => self.enqueue_all().await,
            }
        }
    }

    /// 周期性孤儿清扫
    async fn sweep_loop(&self) {
        let ctx = &self.inner.ctx;
        let period = Duration::from_secs(ctx.config.cascade.sweep_interval_secs);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!("[Sweep] Pass failed: {}", e);
                    }
                }
            }
        }
    }

    /// 执行一次孤儿清扫，返回删除数量
    pub async fn sweep_once(&self) -> Result<usize> {
        self.inner.sweeper.sweep().await
    }
}
