use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::common::error::{Result, SchedulerError};
use crate::common::utils::get_hostname;

/// 级联删除策略
///
/// Schedule 被删除后，其名下的实验实例如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadePolicy {
    /// 删除 (默认)
    /// - 存储支持原生级联时交给存储；否则由 OrphanSweeper 周期清扫。
    Delete,
    /// 保留孤儿实例，不做任何处理
    Orphan,
}

// ==========================================
// 1. 资源配置 (WorkerConfig)
// ==========================================
/// 工作池与队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Reconcile 工作协程数
    ///
    /// - 说明: 同时处理不同 Schedule 的并发度。同一个 Schedule 永远只被一个协程处理。
    /// - 默认值: 系统逻辑核心数 (`num_cpus::get()`)
    pub workers: usize,

    /// 工作队列容量
    ///
    /// - 说明: 等待处理的 Schedule Key 上限，同时作为变更通知通道的缓冲大小。
    /// - 默认值: 1024
    pub queue_capacity: usize,

    /// 全量 Resync 间隔 (秒)
    ///
    /// - 说明: 周期性地把所有 Schedule 重新投递进队列，兜底丢失的变更通知。
    /// - 默认值: 300
    pub resync_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(), // [智能默认] 自动获取核数
            queue_capacity: 1024,
            resync_interval_secs: 300,
        }
    }
}

// ==========================================
// 2. Reconcile 配置 (ReconcileConfig)
// ==========================================
/// 单轮 Reconcile 的节奏与容错配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// GC 复查间隔 (秒)
    ///
    /// - 说明: 即使下一次触发还很远，也至少每隔这么久回来跑一次 HistoryGC。
    /// - 默认值: 60
    pub gc_recheck_interval_secs: u64,

    /// 乐观锁冲突后的首次重排延迟 (毫秒)
    ///
    /// - 说明: 冲突意味着状态已变，应当尽快从新状态重算。
    /// - 默认值: 5
    pub conflict_base_delay_ms: u64,

    /// 其他可重试错误的基础退避 (毫秒)
    /// - 默认值: 1000
    pub retry_base_delay_ms: u64,

    /// 退避封顶 (毫秒)
    /// - 默认值: 300,000 (5分钟)
    pub retry_max_delay_ms: u64,

    /// 单次扫描遗漏触发点的上限
    ///
    /// - 说明: 上次触发时间非常久远 (如停机数月) 时防止无限扫描。
    /// - 超过后只在 `now` 之前的一个窗口内重新扫描，仍能找到最近一次触发点。
    /// - 默认值: 100,000
    pub max_missed_scan: usize,

    /// 追赶触发的合并抑制窗口 (秒)
    ///
    /// - 说明: 合并后的补偿触发点之后，若下一次正常触发落在 `now` 之后这个窗口内，
    ///   则丢弃补偿触发，交给即将到来的正常触发。
    /// - 默认值: None (不抑制)
    #[serde(default)]
    pub suppress_catchup_within_secs: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            gc_recheck_interval_secs: 60,
            conflict_base_delay_ms: 5,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 300_000,
            max_missed_scan: 100_000,
            suppress_catchup_within_secs: None,
        }
    }
}

impl ReconcileConfig {
    pub fn gc_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.gc_recheck_interval_secs)
    }

    pub fn suppress_catchup_within(&self) -> Option<Duration> {
        self.suppress_catchup_within_secs.map(Duration::from_secs)
    }
}

// ==========================================
// 3. 级联配置 (CascadeConfig)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// 级联策略
    pub policy: CascadePolicy,

    /// 孤儿清扫间隔 (秒)
    ///
    /// - 说明: 仅在存储不支持原生级联且策略为 `Delete` 时生效。0 表示关闭。
    /// - 默认值: 120
    pub sweep_interval_secs: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            policy: CascadePolicy::Delete,
            sweep_interval_secs: 120,
        }
    }
}

// ==========================================
// 4. 策略配置 (PolicyConfig)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 优雅停机超时 (秒)
    ///
    /// - 说明: 收到停机信号后等待进行中的 Reconcile 结束的最大时间。
    pub shutdown_timeout_secs: u64,

    /// 空闲拉取的最短等待 (毫秒)
    pub idle_min_wait_ms: u64,

    /// 空闲拉取的最长等待 (毫秒)
    pub idle_max_wait_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
            idle_min_wait_ms: 10,
            idle_max_wait_ms: 1000,
        }
    }
}

// ==========================================
// 5. 总配置入口 (SchedulerConfig)
// ==========================================

/// 调度引擎总配置
///
/// 使用分层结构组织配置项。支持 `serde` 序列化，可直接从 JSON 加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 资源与并发
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Reconcile 节奏
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// 级联删除
    #[serde(default)]
    pub cascade: CascadeConfig,

    /// 策略与行为
    #[serde(default)]
    pub policy: PolicyConfig,

    /// 节点唯一标识 (日志与事件来源)
    /// 默认: `hostname-随机串`
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// 默认命名空间
    /// 默认: "default"
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_node_id() -> String {
    format!("{}-{}", get_hostname(), nanoid::nanoid!(5, &nanoid::alphabet::SAFE))
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            reconcile: ReconcileConfig::default(),
            cascade: CascadeConfig::default(),
            policy: PolicyConfig::default(),
            node_id: default_node_id(),
            namespace: default_namespace(),
        }
    }
}

impl SchedulerConfig {
    /// 快速创建一个开发环境配置
    pub fn new_dev() -> Self {
        let mut cfg = Self::default();
        // 开发环境下节奏快一点，方便调试
        cfg.worker.workers = 2;
        cfg.worker.resync_interval_secs = 5;
        cfg.reconcile.gc_recheck_interval_secs = 5;
        cfg.reconcile.retry_base_delay_ms = 50;
        cfg.cascade.sweep_interval_secs = 2;
        cfg
    }

    /// 从 JSON 字符串加载，缺省字段使用默认值
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw)
            .map_err(|e| SchedulerError::Config(format!("invalid JSON config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// 参数校验
    pub fn validate(&self) -> Result<()> {
        if self.worker.workers == 0 {
            return Err(SchedulerError::Config("worker.workers must be >= 1".into()));
        }
        if self.worker.queue_capacity == 0 {
            return Err(SchedulerError::Config(
                "worker.queue_capacity must be >= 1".into(),
            ));
        }
        if self.reconcile.gc_recheck_interval_secs == 0 {
            return Err(SchedulerError::Config(
                "reconcile.gc_recheck_interval_secs must be >= 1".into(),
            ));
        }
        if self.reconcile.retry_base_delay_ms > self.reconcile.retry_max_delay_ms {
            return Err(SchedulerError::Config(
                "reconcile.retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        if self.policy.idle_min_wait_ms > self.policy.idle_max_wait_ms {
            return Err(SchedulerError::Config(
                "policy.idle_min_wait_ms must not exceed idle_max_wait_ms".into(),
            ));
        }
        if self.reconcile.max_missed_scan == 0 {
            return Err(SchedulerError::Config(
                "reconcile.max_missed_scan must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg = SchedulerConfig::from_json_str(
            r#"{ "worker": { "workers": 4, "queue_capacity": 16, "resync_interval_secs": 30 },
                 "namespace": "chaos" }"#,
        )
        .unwrap();
        assert_eq!(cfg.worker.workers, 4);
        assert_eq!(cfg.namespace, "chaos");
        assert_eq!(cfg.reconcile.gc_recheck_interval_secs, 60);
        assert_eq!(cfg.cascade.policy, CascadePolicy::Delete);
        assert!(!cfg.node_id.is_empty());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = SchedulerConfig::from_json_str(
            r#"{ "worker": { "workers": 0, "queue_capacity": 16, "resync_interval_secs": 30 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = SchedulerConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, SchedulerError::Config(_)));
    }

    #[test]
    fn dev_config_is_valid() {
        SchedulerConfig::new_dev().validate().unwrap();
    }
}
