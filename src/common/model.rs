use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use crate::common::template::ExperimentTemplate;

/// 由本引擎创建的实例都会带上的标签
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// 实例所属 Schedule 名称标签
pub const LABEL_SCHEDULE: &str = "chaos.talos/schedule";
/// `LABEL_MANAGED_BY` 的取值
pub const MANAGER_NAME: &str = "talos-schedule";

// ==========================================
// 1. 对象标识 (ObjectKey / ObjectMeta)
// ==========================================

/// 对象标识: (namespace, name)
///
/// 工作队列、指标、事件都以它为键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// 对象元数据
///
/// `uid`、`resource_version`、`creation_timestamp` 由存储层在写入时分配，
/// 调用方传入的值会被忽略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,

    /// 存储分配的全局唯一 ID
    /// - 同名对象删除后重建，UID 会变化，用于识别孤儿。
    #[serde(default)]
    pub uid: String,

    /// [乐观锁] 资源版本号
    ///
    /// - 每次写入 (Spec 或 Status) 都会递增。
    /// - 更新时必须携带读取时的版本号，不一致则返回 Conflict。
    #[serde(default)]
    pub resource_version: u64,

    /// 创建时间 (存储时钟)
    pub creation_timestamp: DateTime<Utc>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: String::new(),
            resource_version: 0,
            creation_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            labels: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// 属主引用
///
/// 每个实验实例有且只有一个属主 Schedule。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// 指向某个对象的轻量引用 (写入 Schedule.status.active)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

// ==========================================
// 2. 并发策略与保留策略
// ==========================================

/// 并发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// 允许并发，活跃实例数不设上限
    Allow,
    /// 禁止并发 (默认)
    /// - 已有活跃实例时，跳过本次触发并记录事件。
    #[default]
    Forbid,
    /// 替换
    /// - 先终止旧实例，再创建新实例。
    Replace,
}

/// 历史保留策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLimits {
    /// 保留的成功实例数 (None = 不限)
    /// - 默认值: 3
    #[serde(default = "default_successful_limit")]
    pub successful_limit: Option<usize>,

    /// 保留的失败实例数 (None = 不限)
    /// - 默认值: 1
    #[serde(default = "default_failed_limit")]
    pub failed_limit: Option<usize>,

    /// 最大存活时间 (秒)
    /// - 超过此时间的实例无论状态都会被删除。
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
}

fn default_successful_limit() -> Option<usize> {
    Some(3)
}

fn default_failed_limit() -> Option<usize> {
    Some(1)
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            successful_limit: default_successful_limit(),
            failed_limit: default_failed_limit(),
            max_age_seconds: None,
        }
    }
}

// ==========================================
// 3. Schedule 资源
// ==========================================

/// Schedule 期望状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// 触发表达式
    /// - 标准 5 段 cron、带秒的 6/7 段 cron、`@hourly` 等描述符、`@every 90s`。
    pub schedule: String,

    /// 时区 (IANA 名称)，默认 UTC
    #[serde(default)]
    pub time_zone: Option<String>,

    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,

    /// 追赶截止时间 (秒)
    /// - 上次触发距今超过此值时，所有遗漏触发点合并为最近一次。
    #[serde(default)]
    pub starting_deadline_seconds: Option<u64>,

    #[serde(default)]
    pub history: HistoryLimits,

    /// 暂停开关
    #[serde(default)]
    pub suspend: bool,

    /// 实验模板 (每次触发时克隆)
    pub template: ExperimentTemplate,
}

impl ScheduleSpec {
    pub fn new(schedule: impl Into<String>, template: ExperimentTemplate) -> Self {
        Self {
            schedule: schedule.into(),
            time_zone: None,
            concurrency_policy: ConcurrencyPolicy::default(),
            starting_deadline_seconds: None,
            history: HistoryLimits::default(),
            suspend: false,
            template,
        }
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency_policy = policy;
        self
    }

    pub fn with_starting_deadline(mut self, seconds: u64) -> Self {
        self.starting_deadline_seconds = Some(seconds);
        self
    }

    pub fn with_history(mut self, history: HistoryLimits) -> Self {
        self.history = history;
        self
    }

    pub fn with_time_zone(mut self, tz: impl Into<String>) -> Self {
        self.time_zone = Some(tz.into());
        self
    }

    pub fn suspended(mut self, suspend: bool) -> Self {
        self.suspend = suspend;
        self
    }
}

/// Condition 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    /// 触发表达式无效
    InvalidExpression,
}

/// 状态条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Schedule 观测状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    /// 最近一次被消费 (创建或因 Forbid 跳过) 的触发点
    #[serde(default)]
    pub last_scheduled_time: Option<DateTime<Utc>>,

    /// 最近一次成功完成的实例结束时间
    #[serde(default)]
    pub last_successful_time: Option<DateTime<Utc>>,

    /// 当前活跃实例
    #[serde(default)]
    pub active: Vec<ObjectReference>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ScheduleStatus {
    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// 设置条件，返回状态是否发生了翻转
    ///
    /// 只有 `status` 变化时才刷新 `last_transition_time`。
    pub fn set_condition(
        &mut self,
        kind: ConditionType,
        status: bool,
        reason: &str,
        message: String,
        now: DateTime<Utc>,
    ) -> bool {
        match self.conditions.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                let flipped = existing.status != status;
                if flipped {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message;
                flipped
            }
            None => {
                self.conditions.push(Condition {
                    kind,
                    status,
                    reason: reason.to_string(),
                    message,
                    last_transition_time: now,
                });
                status
            }
        }
    }

    /// 移除条件
    pub fn clear_condition(&mut self, kind: ConditionType) {
        self.conditions.retain(|c| c.kind != kind);
    }
}

/// Schedule 资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub meta: ObjectMeta,
    pub spec: ScheduleSpec,
    #[serde(default)]
    pub status: ScheduleStatus,
}

impl Schedule {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ScheduleSpec) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec,
            status: ScheduleStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }

    /// 生成指向自身的属主引用
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: "Schedule".to_string(),
            name: self.meta.name.clone(),
            uid: self.meta.uid.clone(),
        }
    }
}

// ==========================================
// 4. 实验实例 (Experiment)
// ==========================================

/// 实验实例生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentPhase {
    /// 已创建，等待执行引擎接管
    Pending,
    /// 故障注入中
    Running,
    /// 成功结束
    Succeeded,
    /// 失败结束
    Failed,
}

impl ExperimentPhase {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentPhase::Succeeded | ExperimentPhase::Failed)
    }
}

/// 实验实例状态 (由外部执行引擎推进)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub phase: ExperimentPhase,
    /// 结束时间，只能写入一次
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        Self {
            phase: ExperimentPhase::Pending,
            finished_at: None,
        }
    }
}

/// 实验实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub meta: ObjectMeta,
    /// 唯一属主
    pub owner: OwnerReference,
    /// 触发它的时间点 (用于中断后的幂等判断)
    pub scheduled_time: DateTime<Utc>,
    /// 实例化后的模板，创建后不再修改
    pub template: ExperimentTemplate,
    #[serde(default)]
    pub status: ExperimentStatus,
}

impl Experiment {
    /// 确定性实例名: `<schedule>-<触发点 Unix 秒>`
    ///
    /// 同一触发点重复创建会撞名 (AlreadyExists)，从而天然去重。
    pub fn name_for(schedule_name: &str, trigger: DateTime<Utc>) -> String {
        format!("{}-{}", schedule_name, trigger.timestamp())
    }

    pub fn key(&self) -> ObjectKey {
        self.meta.key()
    }

    pub fn phase(&self) -> ExperimentPhase {
        self.status.phase
    }

    pub fn is_active(&self) -> bool {
        !self.status.phase.is_terminal()
    }

    pub fn is_owned_by(&self, schedule: &Schedule) -> bool {
        self.owner.uid == schedule.meta.uid && self.meta.namespace == schedule.meta.namespace
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            name: self.meta.name.clone(),
            namespace: self.meta.namespace.clone(),
            uid: self.meta.uid.clone(),
        }
    }
}
