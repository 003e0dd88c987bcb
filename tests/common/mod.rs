#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use talos_schedule::common::{
    Clock, Experiment, ExperimentPhase, ExperimentStatus, ExperimentTemplate, ManualClock,
    ObjectKey, Schedule, ScheduleSpec, SchedulerConfig,
};
use talos_schedule::driver::{DriverBuilder, DriverContext, MemoryRecorder, ScheduleDriver};
use talos_schedule::persistence::{CascadeMode, ListFilter, MemoryPersistence, ObjectStore};
use talos_schedule::scheduler::{ReconcileOutcome, ScheduleReconciler};

/// 测试日志 (RUST_LOG 控制级别)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
}

pub fn minute(n: i64) -> DateTime<Utc> {
    start() + chrono::TimeDelta::minutes(n)
}

pub fn every_minute() -> ScheduleSpec {
    ScheduleSpec::new("* * * * *", ExperimentTemplate::pod_kill(&[("app", "checkout")]))
}

/// 冻结时钟 + 内存存储 + 收集型事件接收端
pub struct Harness {
    pub clock: ManualClock,
    pub store: MemoryPersistence,
    pub recorder: Arc<MemoryRecorder>,
    pub driver: ScheduleDriver,
    pub reconciler: ScheduleReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CascadeMode::Native, SchedulerConfig::default())
    }

    pub fn with(mode: CascadeMode, config: SchedulerConfig) -> Self {
        init_tracing();
        let clock = ManualClock::new(start());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = MemoryPersistence::new(&config)
            .with_clock(shared.clone())
            .with_cascade(mode);
        let recorder = Arc::new(MemoryRecorder::new(shared.clone()));

        let driver = DriverBuilder::new()
            .with_node_id("test-node")
            .with_config(config)
            .with_persistence(store.clone())
            .with_clock(shared)
            .with_recorder(recorder.clone())
            .build();
        let reconciler = ScheduleReconciler::new(driver.context().clone());

        Self {
            clock,
            store,
            recorder,
            driver,
            reconciler,
        }
    }

    pub fn ctx(&self) -> &DriverContext {
        self.driver.context()
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    pub async fn create(&self, name: &str, spec: ScheduleSpec) -> Schedule {
        self.store
            .create_schedule(Schedule::new("chaos", name, spec))
            .await
            .unwrap()
    }

    pub async fn schedule(&self, key: &ObjectKey) -> Schedule {
        self.store.get_schedule(key).await.unwrap().unwrap()
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileOutcome {
        self.reconciler.reconcile(key).await.unwrap()
    }

    /// 属于该 Schedule 的全部实例 (按创建时间排序)
    pub async fn instances(&self, schedule: &Schedule) -> Vec<Experiment> {
        let filter = ListFilter::in_namespace(schedule.meta.namespace.clone())
            .owned_by(schedule.meta.uid.clone());
        self.store.list_experiments(&filter).await.unwrap()
    }

    /// 模拟外部执行引擎把实例推进到某个阶段
    pub async fn finish(&self, experiment: &Experiment, phase: ExperimentPhase) {
        let current = self
            .store
            .get_experiment(&experiment.key())
            .await
            .unwrap()
            .unwrap();
        self.store
            .update_experiment_status(
                &current.key(),
                current.meta.resource_version,
                ExperimentStatus {
                    phase,
                    finished_at: None,
                },
            )
            .await
            .unwrap();
    }
}
