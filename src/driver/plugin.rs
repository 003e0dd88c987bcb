use async_trait::async_trait;
use std::time::Duration;

use crate::common::{SchedulerError, model::ObjectKey};
use crate::driver::context::DriverContext;

/// 驱动器插件/钩子接口
///
/// 用户可以通过实现此 Trait 来介入 Driver 的生命周期。
/// 常见用途：
/// - 自定义监控 (Metrics)
/// - 错误报警 (Alerting)
/// - 临时冻结某些 Schedule (Filtering)
#[async_trait]
pub trait DriverPlugin: Send + Sync + 'static {
    /// [生命周期] Driver 启动时调用
    async fn on_start(&self, _ctx: &DriverContext) {}

    /// [生命周期] Driver 关闭时调用
    async fn on_shutdown(&self, _ctx: &DriverContext) {}

    /// 每次 Reconcile 之前调用
    ///
    /// # 返回值
    /// - `true`: 继续。
    /// - `false`: 本轮跳过，Key 按重试基础延迟重新入队。
    async fn before_reconcile(&self, _key: &ObjectKey) -> bool {
        true
    }

    /// Reconcile 结束之后调用 (无论成功失败、包括 Panic)
    ///
    /// - `error`: 失败原因，成功时为 None。
    async fn after_reconcile(
        &self,
        _key: &ObjectKey,
        _error: Option<&SchedulerError>,
        _elapsed: Duration,
    ) {
    }
}
