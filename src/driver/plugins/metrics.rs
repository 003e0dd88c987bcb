use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    common::{SchedulerError, model::ObjectKey},
    driver::{DriverPlugin, SchedulerMetrics},
};

/// 指标插件 (Builder 自动注入)
pub struct MetricsPlugin {
    metrics: Arc<SchedulerMetrics>,
}

impl MetricsPlugin {
    pub fn new(metrics: Arc<SchedulerMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl DriverPlugin for MetricsPlugin {
    // 进行中 +1
    async fn before_reconcile(&self, _key: &ObjectKey) -> bool {
        self.metrics.inc_in_flight();
        true
    }

    // 进行中 -1，total+1，失败再 errors+1
    async fn after_reconcile(
        &self,
        _key: &ObjectKey,
        error: Option<&SchedulerError>,
        _elapsed: Duration,
    ) {
        self.metrics.dec_in_flight();
        self.metrics.inc_reconcile();
        if error.is_some() {
            self.metrics.inc_reconcile_error();
        }
    }
}
