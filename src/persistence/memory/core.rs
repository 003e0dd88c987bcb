use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::sync::{Notify, broadcast};

use super::queue::QueueState;
use crate::common::error::{ResourceKind, Result, SchedulerError};
use crate::common::model::{Experiment, ObjectKey, Schedule};
use crate::common::{Clock, SchedulerConfig, SystemClock};
use crate::persistence::model::StoreEvent;

/// 级联模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    /// 删除 Schedule 时同步删除其名下实例
    Native,
    /// 不做级联，交给 OrphanSweeper
    None,
}

/// 可注入故障的存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetSchedule,
    ListSchedules,
    UpdateSchedule,
    UpdateScheduleStatus,
    ListExperiments,
    CreateExperiment,
    DeleteExperiment,
}

/// 注入的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// 返回 `StoreUnavailable`
    Unavailable,
    /// 返回 `Conflict`
    Conflict,
    /// 返回 `NotFound` (对象在读取之后被并发删除)
    NotFound,
}

/// 内存持久化实现 (In-Memory Persistence)
///
/// 同时实现了 WorkQueue 和 ObjectStore。
/// Clone 是廉价的，所有字段都在 Arc 里共享。
#[derive(Clone)]
pub struct MemoryPersistence {
    /// 【数据仓库】Schedule
    /// - DashMap: 分片锁，高并发读写不排队
    pub(super) schedules: Arc<DashMap<ObjectKey, Schedule>>,

    /// 【数据仓库】实验实例
    pub(super) experiments: Arc<DashMap<ObjectKey, Experiment>>,

    /// 全局版本号 (类似 etcd revision)
    pub(super) revision: Arc<AtomicU64>,

    /// 变更广播
    pub(super) events: broadcast::Sender<StoreEvent>,

    /// 时钟 (分配 creation_timestamp)
    pub(super) clock: Arc<dyn Clock>,

    pub(super) cascade: CascadeMode,

    /// 【队列状态】就绪 / 处理中 / 延时
    pub(super) queue: Arc<Mutex<QueueState>>,

    pub(super) capacity: usize,

    /// 通知信号
    pub(super) notify: Arc<Notify>,

    /// 故障注入: 操作 -> (故障, 剩余次数)
    faults: Arc<DashMap<StoreOp, (FaultKind, u32)>>,
}

impl MemoryPersistence {
    /// 创建一个新的内存持久化实例
    ///
    /// 默认使用系统时钟，原生级联。
    pub fn new(config: &SchedulerConfig) -> Self {
        // 广播缓冲与队列容量一致，订阅方落后太多会收到 Lagged 并触发全量 Resync
        let (events, _) = broadcast::channel(config.worker.queue_capacity.max(16));
        Self {
            schedules: Arc::new(DashMap::new()),
            experiments: Arc::new(DashMap::new()),
            revision: Arc::new(AtomicU64::new(0)),
            events,
            clock: Arc::new(SystemClock),
            cascade: CascadeMode::Native,
            queue: Arc::new(Mutex::new(QueueState::default())),
            capacity: config.worker.queue_capacity,
            notify: Arc::new(Notify::new()),
            faults: Arc::new(DashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cascade(mut self, mode: CascadeMode) -> Self {
        self.cascade = mode;
        self
    }

    /// 让接下来 `times` 次 `op` 调用失败
    pub fn inject_fault(&self, op: StoreOp, kind: FaultKind, times: u32) {
        if times == 0 {
            self.faults.remove(&op);
        } else {
            self.faults.insert(op, (kind, times));
        }
    }

    /// 消耗一次注入的故障
    pub(super) fn check_fault(&self, op: StoreOp, key: &ObjectKey) -> Result<()> {
        let fired = match self.faults.get_mut(&op) {
            Some(mut entry) => {
                let (kind, left) = *entry;
                entry.1 = left.saturating_sub(1);
                Some((kind, left <= 1))
            }
            None => None,
        };
        let Some((kind, exhausted)) = fired else {
            return Ok(());
        };
        if exhausted {
            self.faults.remove(&op);
        }
        Err(match kind {
            FaultKind::Unavailable => {
                SchedulerError::StoreUnavailable(format!("injected fault on {:?}", op))
            }
            FaultKind::Conflict => SchedulerError::Conflict {
                kind: resource_of(op),
                key: key.clone(),
                expected: 0,
                actual: 0,
            },
            FaultKind::NotFound => SchedulerError::NotFound {
                kind: resource_of(op),
                key: key.clone(),
            },
        })
    }

    /// 分配下一个版本号
    pub(super) fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 广播变更 (没有订阅者时直接丢弃)
    pub(super) fn publish(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

fn resource_of(op: StoreOp) -> ResourceKind {
    match op {
        StoreOp::ListExperiments | StoreOp::CreateExperiment | StoreOp::DeleteExperiment => {
            ResourceKind::Experiment
        }
        _ => ResourceKind::Schedule,
    }
}

impl std::fmt::Debug for MemoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPersistence")
            .field("schedules", &self.schedules.len())
            .field("experiments", &self.experiments.len())
            .field("revision", &self.revision.load(Ordering::SeqCst))
            .field("cascade", &self.cascade)
            .finish()
    }
}
