pub mod builder;
pub mod context;
pub mod core;
pub mod metrics;
pub mod pacemaker;
pub mod plugin;
pub mod plugins;
pub mod recorder;

pub use self::core::ScheduleDriver;
pub use builder::DriverBuilder;
pub use context::DriverContext;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use pacemaker::{Pacemaker, PacemakerEvent};
pub use plugin::DriverPlugin;
pub use recorder::{Event, EventReason, EventRecorder, MemoryRecorder, Severity, TracingRecorder};
