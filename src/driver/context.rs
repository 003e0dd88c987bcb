use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    common::{Clock, config::SchedulerConfig},
    driver::{EventRecorder, SchedulerMetrics},
    persistence::{ObjectStore, WorkQueue},
};

/// 驱动器上下文 (Driver Context)
///
/// **职责**:
/// 打包了调度引擎运行所需的全部共享资源，显式传给每个组件，不依赖任何进程级单例。
/// Clone 是廉价的 (全部是 Arc)。
#[derive(Clone)]
pub struct DriverContext {
    // --- 身份标识 (Identity) ---
    /// 当前节点的唯一 ID
    ///
    /// 只用于日志与问题排查。引擎假设同一个 Schedule 同时只有一个活跃的 Reconciler。
    pub node_id: String,

    // --- 核心组件 (Components) ---
    /// 对象存储 (Schedule / 实验实例)
    pub store: Arc<dyn ObjectStore>,

    /// 工作队列
    pub queue: Arc<dyn WorkQueue>,

    /// 时钟
    /// - 触发计算、GC 年龄判断都以它为准。
    pub clock: Arc<dyn Clock>,

    /// 事件接收端
    pub recorder: Arc<dyn EventRecorder>,

    /// 全局配置
    pub config: Arc<SchedulerConfig>,

    /// 全局统计指标
    pub metrics: Arc<SchedulerMetrics>,

    // --- 信号与控制 (Signals & Control) ---
    /// 关机信号
    pub shutdown: CancellationToken,
}

impl DriverContext {
    /// 检查是否收到停机信号
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
