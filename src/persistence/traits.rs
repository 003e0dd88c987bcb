use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use crate::common::error::Result;
use crate::common::model::{
    Experiment, ExperimentStatus, ObjectKey, Schedule, ScheduleStatus,
};
use crate::persistence::model::{ListFilter, StoreEvent};

// ==========================================
// 1. 工作队列接口 (WorkQueue) - 调度的节拍
// ==========================================

/// 工作队列接口
///
/// **职责**: 把需要 Reconcile 的 Schedule Key 分发给 Driver 的工作协程。
/// **保证**:
/// - 去重: 尚未处理的同一个 Key 只会排队一次。
/// - 串行: 处理中的 Key 不会被交给第二个协程；处理期间的重复投递推迟到 `release` 之后。
/// - 延时: `add_after` 在到期后才可被取出，同一 Key 多次延时投递以最早的为准。
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// 立即投递
    ///
    /// - 队列满时返回 `QueueFull`，停机后返回 `SchedulerShutdown`。
    async fn add(&self, key: ObjectKey) -> Result<()>;

    /// 延时投递
    ///
    /// `delay` 为零等价于 `add`。
    async fn add_after(&self, key: ObjectKey, delay: Duration) -> Result<()>;

    /// 取出一批可处理的 Key
    ///
    /// 先把已到期的延时 Key 提升为就绪，再按 FIFO 取出至多 `batch_size` 个。
    /// 取出的 Key 进入“处理中”，直到调用 `release`。
    async fn acquire(&self, batch_size: usize) -> Result<Vec<ObjectKey>>;

    /// 归还 Key (处理结束，无论成功失败)
    ///
    /// 处理期间若有新的投递，此时重新进入就绪队列。
    async fn release(&self, key: &ObjectKey) -> Result<()>;

    /// 最近一个延时 Key 的到期时间
    ///
    /// Pacemaker 用它决定空闲时最多睡多久。
    fn next_due(&self) -> Option<Instant>;

    /// 新 Key 就绪时的唤醒信号
    fn notifier(&self) -> Arc<Notify>;

    /// 就绪 + 延时中的 Key 数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭队列
    ///
    /// 之后的投递被拒绝，`acquire` 返回空。
    fn shutdown(&self);
}

// ==========================================
// 2. 对象存储接口 (ObjectStore) - 系统的身体
// ==========================================

/// 对象存储接口
///
/// **职责**: Schedule 与实验实例的持久化，带乐观并发控制与变更通知。
/// **约定**:
/// - 所有写操作都会分配新的 `resource_version`。
/// - 带版本号的写操作在版本不一致时返回 `Conflict`，绝不静默覆盖。
/// - `uid` / `creation_timestamp` 由存储分配。
/// - 实现可以是最终一致的: 列表结果可能略微滞后，创建冲突以存储为准。
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    // --- Schedule ---

    async fn get_schedule(&self, key: &ObjectKey) -> Result<Option<Schedule>>;

    /// 列出 Schedule (`namespace` 为 None 时列出全部)
    async fn list_schedules(&self, namespace: Option<&str>) -> Result<Vec<Schedule>>;

    /// 创建 Schedule
    ///
    /// 已存在时返回 `AlreadyExists`。
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule>;

    /// 更新 Spec 与标签
    ///
    /// 以 `schedule.meta.resource_version` 作为期望版本。传入的 status 被忽略。
    async fn update_schedule(&self, schedule: Schedule) -> Result<Schedule>;

    /// 独立写入 Status
    async fn update_schedule_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: ScheduleStatus,
    ) -> Result<Schedule>;

    /// 删除 Schedule，返回是否真的删除了对象
    async fn delete_schedule(&self, key: &ObjectKey) -> Result<bool>;

    // --- Experiment ---

    async fn get_experiment(&self, key: &ObjectKey) -> Result<Option<Experiment>>;

    async fn list_experiments(&self, filter: &ListFilter) -> Result<Vec<Experiment>>;

    /// 创建实验实例
    ///
    /// 同名实例已存在时返回 `AlreadyExists`。
    async fn create_experiment(&self, experiment: Experiment) -> Result<Experiment>;

    /// 写入实例状态 (外部执行引擎使用)
    ///
    /// - `finished_at` 一经写入不可修改，违反时返回 `Immutable`。
    async fn update_experiment_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: ExperimentStatus,
    ) -> Result<Experiment>;

    /// 删除实验实例 (幂等)
    ///
    /// - `precondition`: 期望的 resource_version，不一致返回 `Conflict`。
    /// - 对象已不存在时返回 `Ok(false)`。
    async fn delete_experiment(&self, key: &ObjectKey, precondition: Option<u64>) -> Result<bool>;

    // --- Watch ---

    /// 订阅变更通知
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// 删除 Schedule 时是否原生级联删除其实例
    fn supports_cascade(&self) -> bool;
}
