use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    common::{Clock, SchedulerConfig, SystemClock},
    driver::{
        DriverContext, DriverPlugin, EventRecorder, ScheduleDriver, SchedulerMetrics,
        TracingRecorder, plugins::MetricsPlugin,
    },
    persistence::{MemoryPersistence, ObjectStore, WorkQueue},
    policy::{ExponentialBackoff, WaitStrategy},
};

/// 调度驱动构造器 (Builder Pattern)
pub struct DriverBuilder {
    /// 节点ID名
    node_id: Option<String>,
    /// 全局配置
    config: Option<SchedulerConfig>,
    /// 等待策略
    wait_strategy: Option<Arc<dyn WaitStrategy>>,
    /// 插件列表
    plugins: Vec<Box<dyn DriverPlugin>>,
    /// 持久化 - 存储层 (Option 用于处理默认值逻辑)
    store: Option<Arc<dyn ObjectStore>>,
    /// 持久化 - 队列层
    queue: Option<Arc<dyn WorkQueue>>,
    /// 时钟
    clock: Option<Arc<dyn Clock>>,
    /// 事件接收端
    recorder: Option<Arc<dyn EventRecorder>>,
    /// 全局统计指标
    metrics: Arc<SchedulerMetrics>,

    shutdown: Option<CancellationToken>,
}

impl Default for DriverBuilder {
    /// 创建一个新的构造器
    ///
    /// **默认行为**:
    /// - Config: Default
    /// - WaitStrategy: ExponentialBackoff (指数退避)
    /// - Persistence: MemoryPersistence
    /// - Clock: SystemClock
    /// - Recorder: TracingRecorder
    fn default() -> Self {
        Self {
            node_id: None,
            config: None,
            wait_strategy: None,
            plugins: Vec::new(),
            store: None,
            queue: None,
            clock: None,
            recorder: None,
            metrics: Arc::new(SchedulerMetrics::default()),
            shutdown: None,
        }
    }
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置节点 ID (如果不设，使用配置里的 node_id)
    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// 设置调度器配置
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置等待策略
    pub fn with_wait_strategy<S>(mut self, strategy: S) -> Self
    where
        S: WaitStrategy + 'static,
    {
        self.wait_strategy = Some(Arc::new(strategy));
        self
    }

    /// 添加插件 (支持链式调用)
    ///
    /// **注意**: 插件的执行顺序与添加顺序一致 (FIFO)，内置的 MetricsPlugin 总在最前。
    pub fn with_plugin<PL>(mut self, plugin: PL) -> Self
    where
        PL: DriverPlugin + 'static,
    {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// 设置持久化层
    ///
    /// - 接收一个同时实现了 `WorkQueue + ObjectStore` 的具体类型 `P`，
    ///   包装为 `Arc` 后分别转为两个 trait object。
    pub fn with_persistence<P>(mut self, persistence: P) -> Self
    where
        P: WorkQueue + ObjectStore + 'static,
    {
        let arc = Arc::new(persistence);
        self.store = Some(arc.clone());
        self.queue = Some(arc);
        self
    }

    /// 单独设置工作队列
    pub fn with_queue<Q>(mut self, queue: Q) -> Self
    where
        Q: WorkQueue + 'static,
    {
        self.queue = Some(Arc::new(queue));
        self
    }

    /// 单独设置对象存储
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: ObjectStore + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// 共享外部指标对象
    pub fn with_metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// 注入外部停机信号 (多组件协同)
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// 构建驱动器
    pub fn build(mut self) -> ScheduleDriver {
        let config = self.config.unwrap_or_default();
        let node_id = self.node_id.unwrap_or_else(|| config.node_id.clone());
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        // 处理持久化层的默认逻辑
        let (store, queue) = match (self.store, self.queue) {
            (Some(s), Some(q)) => (s, q),
            (store, queue) => {
                debug!("[Builder] Using default MemoryPersistence");
                let mem = Arc::new(MemoryPersistence::new(&config).with_clock(clock.clone()));
                (
                    store.unwrap_or_else(|| mem.clone() as Arc<dyn ObjectStore>),
                    queue.unwrap_or_else(|| mem as Arc<dyn WorkQueue>),
                )
            }
        };

        // 默认等待策略：指数退避
        let wait_strategy = self.wait_strategy.unwrap_or_else(|| {
            Arc::new(ExponentialBackoff::new(
                config.policy.idle_min_wait_ms,
                config.policy.idle_max_wait_ms,
            ))
        });

        // 自动注入 MetricsPlugin
        self.plugins
            .insert(0, Box::new(MetricsPlugin::new(self.metrics.clone())));

        let ctx = DriverContext {
            node_id,
            store,
            queue,
            clock,
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(TracingRecorder)),
            config: Arc::new(config),
            metrics: self.metrics,
            shutdown: self.shutdown.unwrap_or_default(),
        };
        ScheduleDriver::new_with_components(ctx, self.plugins, wait_strategy)
    }
}
