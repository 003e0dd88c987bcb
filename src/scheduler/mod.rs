pub mod client;
pub mod cron;
pub mod gc;
pub mod lister;
pub mod pause;
pub mod reconciler;
pub mod sweep;

pub use self::client::ScheduleClient;
pub use self::cron::{CatchUp, Evaluation, TriggerSchedule};
pub use self::gc::{Expiry, GcReport, HistoryGC};
pub use self::lister::ActiveLister;
pub use self::pause::PauseGate;
pub use self::reconciler::{ReconcileOutcome, ScheduleReconciler};
pub use self::sweep::OrphanSweeper;
