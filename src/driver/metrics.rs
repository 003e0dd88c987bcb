use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::common::model::ObjectKey;

/// 调度引擎核心指标
// 使用 Atomic 保证高并发下的计数性能
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    // --- 瞬时状态 (Gauges) ---
    /// 当前正在进行的 Reconcile 数
    pub in_flight: AtomicUsize,

    /// 每个 Schedule 的活跃实例数
    active_instances: DashMap<ObjectKey, usize>,

    // --- 累积计数 (Counters) ---
    /// 成功创建的实例数
    pub triggers_fired: AtomicU64,

    /// 因 Forbid 被跳过的触发数
    pub triggers_skipped: AtomicU64,

    /// HistoryGC 删除的实例数
    pub gc_deleted: AtomicU64,

    /// HistoryGC 删除失败次数
    pub gc_failures: AtomicU64,

    /// Reconcile 总次数
    pub reconcile_total: AtomicU64,

    /// Reconcile 失败次数 (含 Panic)
    pub reconcile_errors: AtomicU64,

    /// OrphanSweeper 删除的孤儿数
    pub orphans_deleted: AtomicU64,
}

/// 指标快照 (可序列化，便于导出)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub in_flight: usize,
    pub triggers_fired: u64,
    pub triggers_skipped: u64,
    pub gc_deleted: u64,
    pub gc_failures: u64,
    pub reconcile_total: u64,
    pub reconcile_errors: u64,
    pub orphans_deleted: u64,
    /// `namespace/name` -> 活跃实例数
    pub active_instances: BTreeMap<String, usize>,
}

impl SchedulerMetrics {
    pub fn inc_in_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_fired(&self) {
        self.triggers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.triggers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_gc_deleted(&self, n: u64) {
        self.gc_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_gc_failure(&self) {
        self.gc_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconcile(&self) {
        self.reconcile_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconcile_error(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_orphan_deleted(&self) {
        self.orphans_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// 设置某个 Schedule 的活跃实例数
    pub fn set_active(&self, key: &ObjectKey, count: usize) {
        self.active_instances.insert(key.clone(), count);
    }

    /// Schedule 被删除后清掉它的 Gauge
    pub fn clear_active(&self, key: &ObjectKey) {
        self.active_instances.remove(key);
    }

    pub fn active(&self, key: &ObjectKey) -> Option<usize> {
        self.active_instances.get(key).map(|v| *v)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            in_flight: self.in_flight.load(Ordering::Relaxed),
            triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
            triggers_skipped: self.triggers_skipped.load(Ordering::Relaxed),
            gc_deleted: self.gc_deleted.load(Ordering::Relaxed),
            gc_failures: self.gc_failures.load(Ordering::Relaxed),
            reconcile_total: self.reconcile_total.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
            orphans_deleted: self.orphans_deleted.load(Ordering::Relaxed),
            active_instances: self
                .active_instances
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
        }
    }
}
