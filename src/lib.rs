// 1. 基础模块
pub mod common;

// 2. 核心接口与实现
pub mod driver;
pub mod persistence;
pub mod policy;

// 3. 调度器核心
pub mod scheduler;

pub use common::{
    ConcurrencyPolicy, Experiment, ExperimentPhase, ExperimentTemplate, ObjectKey, Result,
    Schedule, ScheduleSpec, SchedulerConfig, SchedulerError,
};
pub use driver::{DriverBuilder, ScheduleDriver};
pub use persistence::MemoryPersistence;
pub use scheduler::ScheduleClient;
