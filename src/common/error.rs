use thiserror::Error;

use crate::common::model::ObjectKey;

/// 调度引擎统一结果类型
///
/// 使用此别名可以简化函数签名：`fn do_something() -> Result<()>`
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// 资源类别，用于错误信息与日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Schedule,
    Experiment,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Schedule => f.write_str("Schedule"),
            ResourceKind::Experiment => f.write_str("Experiment"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    // ==========================================
    // 1. 配置与启动错误 (Configuration & Startup)
    // ==========================================
    /// 配置错误
    ///
    /// - 触发场景: 解析 JSON 配置失败、参数校验不通过。
    /// - 后果: 引擎拒绝启动。
    #[error("Configuration error: {0}")]
    Config(String),

    /// 调度引擎已停机
    ///
    /// - 触发场景: 在 `shutdown()` 之后仍有组件尝试投递 Key。
    #[error("Scheduler is stopping, rejecting new work.")]
    SchedulerShutdown,

    // ==========================================
    // 2. 队列错误 (Queue)
    // ==========================================
    /// 工作队列已满 (背压保护)
    ///
    /// - 触发场景: 待处理 Key 数量达到 `queue_capacity`。
    /// - 处理: 丢弃本次投递，周期性 Resync 会补齐。
    #[error("Work queue is full (capacity: {0}). Backpressure triggered.")]
    QueueFull(usize),

    // ==========================================
    // 3. 存储交互错误 (Object Store)
    // ==========================================
    /// [核心] 乐观锁冲突 (Resource Version 不匹配)
    ///
    /// - 触发场景: 本轮 Reconcile 读取对象之后，另一个参与者修改了它。
    /// - 处理: 放弃本轮，按退避重新入队，从最新状态重新计算。绝不盲目重试写入。
    #[error("Conflict on {kind} {key}: expected version {expected}, found {actual}.")]
    Conflict {
        kind: ResourceKind,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// 对象不存在
    #[error("{kind} {key} not found.")]
    NotFound { kind: ResourceKind, key: ObjectKey },

    /// 对象已存在 (创建冲突)
    ///
    /// - 对确定性命名的实验实例而言，这代表上一轮已经创建成功，视为成功。
    #[error("{kind} {key} already exists.")]
    AlreadyExists { kind: ResourceKind, key: ObjectKey },

    /// 违反不可变约束 (例如修改已写入的 finished_at)
    #[error("Immutable field violated on {kind} {key}: {field}")]
    Immutable {
        kind: ResourceKind,
        key: ObjectKey,
        field: &'static str,
    },

    /// 存储暂不可用 (网络抖动、后端重启)
    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    /// 外部存储实现的任意错误 (Anyhow 包装)
    #[error("Object store failure: {0}")]
    Store(#[source] anyhow::Error),

    /// 序列化/反序列化失败
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 通用 IO 错误
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    // ==========================================
    // 4. 调度逻辑错误 (Scheduling)
    // ==========================================
    /// 触发表达式无效
    ///
    /// - 触发场景: Schedule 的 cron 表达式无法解析，或时区名称未知。
    /// - 后果: 在 Spec 被修正之前，该 Schedule 不再做触发计算 (以 Condition 形式暴露)。
    #[error("Invalid schedule expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// 实验模板无效
    #[error("Invalid experiment template: {0}")]
    InvalidTemplate(String),

    /// Reconcile 过程中发生 Panic
    #[error("Reconcile of {0} panicked: {1}")]
    ReconcilePanic(ObjectKey, String),
}

impl SchedulerError {
    /// 判断该错误是否值得重试 (Retryable)
    ///
    /// - 返回 `true`: 暂时性故障 (冲突、存储抖动、背压)。Driver 应按退避重新入队。
    /// - 返回 `false`: 永久性故障 (配置错误、表达式错误、数据损坏)。重试无意义。
    pub fn is_retryable(&self) -> bool {
        match self {
            // --- 可以重试的情况 ---
            SchedulerError::Conflict { .. } => true,
            SchedulerError::StoreUnavailable(_) => true,
            SchedulerError::Store(_) => true,
            SchedulerError::Io(_) => true,
            SchedulerError::QueueFull(_) => true,
            // Panic 可能由瞬时数据触发，给它一次带退避的机会
            SchedulerError::ReconcilePanic(..) => true,

            // --- 不可重试的情况 ---
            SchedulerError::Config(_) => false,
            SchedulerError::InvalidExpression { .. } => false,
            SchedulerError::InvalidTemplate(_) => false,
            SchedulerError::Serialization(_) => false,
            SchedulerError::Immutable { .. } => false,
            // NotFound / AlreadyExists 由调用方按语义吸收，不走重试
            SchedulerError::NotFound { .. } => false,
            SchedulerError::AlreadyExists { .. } => false,
            SchedulerError::SchedulerShutdown => false,
        }
    }

    /// 是否为乐观锁冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::Conflict { .. })
    }

    /// 是否为对象不存在
    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedulerError::NotFound { .. })
    }

    /// 是否为创建冲突
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SchedulerError::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "nightly")
    }

    #[test]
    fn conflict_is_retryable() {
        let err = SchedulerError::Conflict {
            kind: ResourceKind::Schedule,
            key: key(),
            expected: 3,
            actual: 4,
        };
        assert!(err.is_retryable());
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Conflict on Schedule default/nightly: expected version 3, found 4."
        );
    }

    #[test]
    fn invalid_expression_is_terminal() {
        let err = SchedulerError::InvalidExpression {
            expr: "not a cron".into(),
            reason: "bad field".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn not_found_is_absorbed_not_retried() {
        let err = SchedulerError::NotFound {
            kind: ResourceKind::Experiment,
            key: key(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }
}
