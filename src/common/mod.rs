pub mod config;
pub mod error;
pub mod model;
pub mod template;
pub mod time;
pub mod traits;
pub(crate) mod utils;

// 导出配置
pub use config::{CascadePolicy, SchedulerConfig};

// 导出错误类型
pub use error::{ResourceKind, Result, SchedulerError};

// 导出核心模型
pub use model::{
    ConcurrencyPolicy, Condition, ConditionType, Experiment, ExperimentPhase, ExperimentStatus,
    HistoryLimits, ObjectKey, ObjectMeta, ObjectReference, OwnerReference, Schedule,
    ScheduleSpec, ScheduleStatus,
};
pub use template::ExperimentTemplate;

// 导出需实现的 Trait
pub use traits::ChaosSpec;

pub use time::{Clock, ManualClock, SystemClock, TimeUtils};
// 内部工具的快捷访问
pub(crate) use utils::{calculate_backoff, new_uid};
