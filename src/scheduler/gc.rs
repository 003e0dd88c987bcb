use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::{
    common::{Experiment, ExperimentPhase, HistoryLimits, ObjectKey, Schedule},
    driver::{DriverContext, Event, EventReason},
};

/// 一轮清理的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// 已删除 (或本来就不存在) 的实例
    pub deleted: Vec<ObjectKey>,
    /// 删除失败的实例数，下一轮再试
    pub failed: usize,
}

/// 实例被清理的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// 超出该阶段的保留个数
    Retention,
    /// 超过 max_age
    Age,
}

/// 计算需要删除的实例 (纯函数)
///
/// 1. 终态实例按阶段分组，每组按结束时间倒序，保留前 `limit` 个。
/// 2. 任何实例 (包括活跃的) 创建时间早于 `now - max_age` 都会被删除。
///
/// 返回的 Key 已去重，按名称排序。两条规则都命中时记为 `Retention`。
pub fn plan(
    owned: &[Experiment],
    limits: &HistoryLimits,
    now: DateTime<Utc>,
) -> Vec<(ObjectKey, Expiry)> {
    let mut doomed = BTreeMap::new();

    for (phase, limit) in [
        (ExperimentPhase::Succeeded, limits.successful_limit),
        (ExperimentPhase::Failed, limits.failed_limit),
    ] {
        let Some(limit) = limit else {
            continue;
        };
        let mut finished: Vec<&Experiment> =
            owned.iter().filter(|e| e.phase() == phase).collect();
        // 最近结束的在前；没有 finished_at 的按创建时间兜底
        finished.sort_by(|a, b| finish_time(b).cmp(&finish_time(a)));
        doomed.extend(
            finished
                .into_iter()
                .skip(limit)
                .map(|e| (e.key(), Expiry::Retention)),
        );
    }

    // 超出可表示范围的 max_age 等价于不限
    let max_age = limits
        .max_age_seconds
        .and_then(|s| i64::try_from(s).ok())
        .and_then(TimeDelta::try_seconds);
    if let Some(max_age) = max_age {
        if let Some(cutoff) = now.checked_sub_signed(max_age) {
            for e in owned.iter().filter(|e| e.meta.creation_timestamp < cutoff) {
                doomed.entry(e.key()).or_insert(Expiry::Age);
            }
        }
    }

    doomed.into_iter().collect()
}

fn finish_time(e: &Experiment) -> DateTime<Utc> {
    e.status.finished_at.unwrap_or(e.meta.creation_timestamp)
}

/// 历史清理器
///
/// 尽力而为: 删除是幂等的 (不存在即成功)，单个失败只记日志与计数，
/// 不中断本轮 Reconcile，下一轮重新计算时会再次尝试。
#[derive(Clone)]
pub struct HistoryGC {
    ctx: DriverContext,
}

impl HistoryGC {
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    /// 对刚重新读取的属主实例执行清理
    pub async fn collect(
        &self,
        schedule: &Schedule,
        fresh: &[Experiment],
        now: DateTime<Utc>,
    ) -> GcReport {
        let mut report = GcReport::default();
        let targets = plan(fresh, &schedule.spec.history, now);
        if targets.is_empty() {
            return report;
        }

        let owner = schedule.key();
        let mut removed = 0u64;
        for (key, expiry) in targets {
            match self.ctx.store.delete_experiment(&key, None).await {
                Ok(existed) => {
                    if existed {
                        debug!("[GC] Deleted {} (owner {}, {:?})", key, owner, expiry);
                        removed += 1;
                        let message = match expiry {
                            Expiry::Retention => format!(
                                "Deleted finished experiment {} beyond the history limit",
                                key.name
                            ),
                            Expiry::Age => format!(
                                "Deleted experiment {} older than the maximum age",
                                key.name
                            ),
                        };
                        self.ctx
                            .recorder
                            .record(&owner, Event::normal(EventReason::HistoryDeleted, message));
                    }
                    report.deleted.push(key);
                }
                Err(e) if e.is_not_found() => report.deleted.push(key),
                Err(e) => {
                    warn!("[GC] Failed to delete {} (owner {}): {}", key, owner, e);
                    self.ctx.metrics.inc_gc_failure();
                    report.failed += 1;
                }
            }
        }

        self.ctx.metrics.add_gc_deleted(removed);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        ExperimentStatus, ExperimentTemplate, ObjectMeta, OwnerReference,
    };
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
    }

    fn exp(name: &str, phase: ExperimentPhase, created_min: i64, finished_min: Option<i64>) -> Experiment {
        let mut meta = ObjectMeta::new("chaos", name);
        meta.creation_timestamp = base() + TimeDelta::minutes(created_min);
        Experiment {
            meta,
            owner: OwnerReference {
                kind: "Schedule".into(),
                name: "web".into(),
                uid: "uid-web".into(),
            },
            scheduled_time: base() + TimeDelta::minutes(created_min),
            template: ExperimentTemplate::pod_kill(&[("app", "web")]),
            status: ExperimentStatus {
                phase,
                finished_at: finished_min.map(|m| base() + TimeDelta::minutes(m)),
            },
        }
    }

    fn names(doomed: &[(ObjectKey, Expiry)]) -> Vec<&str> {
        doomed.iter().map(|(k, _)| k.name.as_str()).collect()
    }

    #[test]
    fn keeps_most_recently_finished_per_phase() {
        let owned = vec![
            exp("s1", ExperimentPhase::Succeeded, 0, Some(5)),
            exp("s2", ExperimentPhase::Succeeded, 10, Some(15)),
            // 创建较早但结束最晚
            exp("s3", ExperimentPhase::Succeeded, 1, Some(30)),
            exp("f1", ExperimentPhase::Failed, 20, Some(21)),
            exp("f2", ExperimentPhase::Failed, 22, Some(23)),
            exp("r1", ExperimentPhase::Running, 40, None),
        ];
        let limits = HistoryLimits {
            successful_limit: Some(2),
            failed_limit: Some(1),
            max_age_seconds: None,
        };
        let doomed = plan(&owned, &limits, base() + TimeDelta::hours(1));
        assert_eq!(names(&doomed), vec!["f1", "s1"]);
    }

    #[test]
    fn unlimited_and_zero_limits() {
        let owned = vec![
            exp("s1", ExperimentPhase::Succeeded, 0, Some(1)),
            exp("s2", ExperimentPhase::Succeeded, 2, Some(3)),
            exp("f1", ExperimentPhase::Failed, 4, Some(5)),
        ];
        let limits = HistoryLimits {
            successful_limit: None,
            failed_limit: Some(0),
            max_age_seconds: None,
        };
        let doomed = plan(&owned, &limits, base());
        assert_eq!(names(&doomed), vec!["f1"]);
    }

    #[test]
    fn max_age_applies_to_every_phase() {
        let owned = vec![
            exp("old-running", ExperimentPhase::Running, 0, None),
            exp("old-done", ExperimentPhase::Succeeded, 5, Some(6)),
            exp("young", ExperimentPhase::Pending, 50, None),
        ];
        let limits = HistoryLimits {
            successful_limit: Some(10),
            failed_limit: Some(10),
            max_age_seconds: Some(1800),
        };
        let doomed = plan(&owned, &limits, base() + TimeDelta::hours(1));
        assert_eq!(names(&doomed), vec!["old-done", "old-running"]);
        assert!(doomed.iter().all(|(_, expiry)| *expiry == Expiry::Age));
    }

    #[test]
    fn retention_wins_when_both_rules_match() {
        let owned = vec![
            exp("s1", ExperimentPhase::Succeeded, 0, Some(1)),
            exp("r1", ExperimentPhase::Running, 2, None),
        ];
        let limits = HistoryLimits {
            successful_limit: Some(0),
            failed_limit: None,
            max_age_seconds: Some(60),
        };
        let doomed = plan(&owned, &limits, base() + TimeDelta::hours(1));
        assert_eq!(
            doomed,
            vec![
                (ObjectKey::new("chaos", "r1"), Expiry::Age),
                (ObjectKey::new("chaos", "s1"), Expiry::Retention),
            ]
        );
    }

    #[test]
    fn nothing_to_collect_within_limits() {
        let owned = vec![exp("s1", ExperimentPhase::Succeeded, 0, Some(1))];
        assert!(plan(&owned, &HistoryLimits::default(), base()).is_empty());
    }
}
