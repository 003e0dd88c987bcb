use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    common::{
        ConditionType, Experiment, ExperimentPhase, ObjectKey, ObjectMeta, Result, Schedule,
        TimeUtils,
        model::{LABEL_MANAGED_BY, LABEL_SCHEDULE, MANAGER_NAME},
    },
    driver::{DriverContext, Event, EventReason},
    policy::{Action, decide},
    scheduler::{
        ActiveLister, HistoryGC, PauseGate,
        cron::{CatchUp, TriggerSchedule},
    },
};

/// 一轮 Reconcile 的结论
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// 多久之后再次处理该 Schedule (None = 不再主动重排，等待变更通知)
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

/// 单个 Schedule 的协调器
///
/// **状态机**: Fetch -> EvaluateTrigger -> ListActive -> Decide -> Act -> GC -> Persist
///
/// - 每轮都从存储重新读取，不在两轮之间缓存任何东西。
/// - 变更之后的每一步都可以安全重放: 实例名是确定的、创建撞名视为成功、
///   删除不存在视为成功、已物化的触发点不会再次触发。
/// - 唯一有副作用的组件。其余部件 (触发计算、策略裁决) 都是纯函数。
#[derive(Clone)]
pub struct ScheduleReconciler {
    ctx: DriverContext,
    lister: ActiveLister,
    gc: HistoryGC,
}

impl ScheduleReconciler {
    pub fn new(ctx: DriverContext) -> Self {
        Self {
            lister: ActiveLister::new(ctx.store.clone()),
            gc: HistoryGC::new(ctx.clone()),
            ctx,
        }
    }

    /// 处理一次投递
    ///
    /// 返回错误时本轮被放弃，由 Driver 按错误类型决定退避。
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let ctx = &self.ctx;

        // === 1. Fetch ===
        let Some(schedule) = ctx.store.get_schedule(key).await? else {
            // 对象已删除: 实例交给级联删除或孤儿清扫
            debug!("[Reconciler] {} is gone, nothing to do", key);
            ctx.metrics.clear_active(key);
            return Ok(ReconcileOutcome::done());
        };

        let now = ctx.clock.now();
        let mut status = schedule.status.clone();
        // 持久化成功后才发出的事件
        let mut deferred: Vec<Event> = Vec::new();

        // === 2. EvaluateTrigger ===
        let mut due = None;
        let mut next = None;
        if PauseGate::is_paused(&schedule) {
            debug!("[Reconciler] {} is suspended, skipping trigger evaluation", key);
        } else {
            match TriggerSchedule::parse(&schedule.spec.schedule, schedule.spec.time_zone.as_deref())
            {
                Ok(trigger) => {
                    status.clear_condition(ConditionType::InvalidExpression);
                    let origin = status
                        .last_scheduled_time
                        .unwrap_or(schedule.meta.creation_timestamp);
                    let eval = trigger.evaluate(origin, now, &self.catch_up(&schedule));
                    if eval.due.len() > 1 {
                        debug!(
                            "[Reconciler] {} missed {} triggers, acting on the latest",
                            key,
                            eval.due.len()
                        );
                    }
                    due = eval.actionable();
                    next = eval.next;
                }
                Err(e) => {
                    let flipped = status.set_condition(
                        ConditionType::InvalidExpression,
                        true,
                        "ParseError",
                        e.to_string(),
                        now,
                    );
                    if flipped {
                        warn!("[Reconciler] {} has an invalid expression: {}", key, e);
                        deferred.push(Event::warning(EventReason::InvalidExpression, e.to_string()));
                    }
                }
            }
        }

        // === 3. ListActive ===
        let owned = self.lister.list_owned(&schedule).await?;

        // 中断恢复: 上一轮已经创建了实例，但状态没来得及写回
        if let Some(trigger) = due {
            if owned.iter().any(|e| e.scheduled_time == trigger) {
                debug!(
                    "[Reconciler] {} trigger {} already materialized",
                    key, trigger
                );
                status.last_scheduled_time = Some(trigger);
                due = None;
            }
        }

        let mut active: Vec<&Experiment> = owned.iter().filter(|e| e.is_active()).collect();
        active.sort_by(|a, b| {
            a.meta
                .creation_timestamp
                .cmp(&b.meta.creation_timestamp)
                .then_with(|| a.meta.name.cmp(&b.meta.name))
        });

        // === 4. Decide & Act ===
        let mut skipped = false;
        match decide(schedule.spec.concurrency_policy, active.len(), due) {
            Action::NoAction => {}
            Action::CreateNew { trigger } => {
                self.create_instance(&schedule, trigger).await?;
                status.last_scheduled_time = Some(trigger);
            }
            Action::Skip { trigger } => {
                debug!(
                    "[Reconciler] {} trigger {} skipped, {} instance(s) still active",
                    key,
                    trigger,
                    active.len()
                );
                status.last_scheduled_time = Some(trigger);
                skipped = true;
                deferred.push(Event::normal(
                    EventReason::TriggerSkippedForbidden,
                    format!(
                        "Missed trigger at {}: concurrency policy forbids a second active instance",
                        trigger.to_rfc3339()
                    ),
                ));
            }
            Action::ReplaceThenCreate { trigger } => {
                self.terminate(&schedule, &active).await?;
                self.create_instance(&schedule, trigger).await?;
                status.last_scheduled_time = Some(trigger);
            }
        }

        // === 5. GC (重新读取) ===
        let fresh = self.lister.list_owned(&schedule).await?;
        let report = self.gc.collect(&schedule, &fresh, now).await;
        let removed: HashSet<&ObjectKey> = report.deleted.iter().collect();

        let observed_success = fresh
            .iter()
            .filter(|e| e.phase() == ExperimentPhase::Succeeded)
            .filter_map(|e| e.status.finished_at)
            .max();
        status.last_successful_time = status.last_successful_time.max(observed_success);

        status.active = fresh
            .iter()
            .filter(|e| e.is_active() && !removed.contains(&e.key()))
            .map(Experiment::reference)
            .collect();
        ctx.metrics.set_active(key, status.active.len());

        // === 6. Persist (只在变化时写入) ===
        if status != schedule.status {
            match ctx
                .store
                .update_schedule_status(key, schedule.meta.resource_version, status)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!("[Reconciler] {} deleted mid-cycle", key);
                    ctx.metrics.clear_active(key);
                    return Ok(ReconcileOutcome::done());
                }
                Err(e) => return Err(e),
            }
        }

        if skipped {
            ctx.metrics.inc_skipped();
        }
        for event in deferred {
            ctx.recorder.record(key, event);
        }

        // === 7. Requeue ===
        let gc_interval = ctx.config.reconcile.gc_recheck_interval();
        let requeue = match next {
            Some(at) => TimeUtils::until(now, at).min(gc_interval),
            None => gc_interval,
        };
        Ok(ReconcileOutcome::requeue(requeue))
    }

    fn catch_up(&self, schedule: &Schedule) -> CatchUp {
        CatchUp {
            deadline: schedule
                .spec
                .starting_deadline_seconds
                .map(Duration::from_secs),
            max_scan: self.ctx.config.reconcile.max_missed_scan,
            suppress_within: self.ctx.config.reconcile.suppress_catchup_within(),
        }
    }

    /// 为触发点创建实例
    ///
    /// 实例名由 (Schedule 名, 触发点) 决定，撞名说明之前已经创建成功。
    async fn create_instance(&self, schedule: &Schedule, trigger: DateTime<Utc>) -> Result<()> {
        schedule.spec.template.validate()?;

        let namespace = schedule.meta.namespace.clone();
        let mut meta = ObjectMeta::new(
            namespace.clone(),
            Experiment::name_for(&schedule.meta.name, trigger),
        );
        meta.labels
            .insert(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string());
        meta.labels
            .insert(LABEL_SCHEDULE.to_string(), schedule.meta.name.clone());

        let experiment = Experiment {
            meta,
            owner: schedule.owner_reference(),
            scheduled_time: trigger,
            template: schedule.spec.template.instantiate(&namespace),
            status: Default::default(),
        };

        match self.ctx.store.create_experiment(experiment).await {
            Ok(created) => {
                info!(
                    "[Reconciler] {} fired trigger {} -> {}",
                    schedule.key(),
                    trigger,
                    created.meta.name
                );
                self.ctx.metrics.inc_fired();
                self.ctx.recorder.record(
                    &schedule.key(),
                    Event::normal(
                        EventReason::TriggerFired,
                        format!(
                            "Created {} {} for trigger {}",
                            schedule.spec.template.kind(),
                            created.meta.name,
                            trigger.to_rfc3339()
                        ),
                    ),
                );
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(
                    "[Reconciler] {} instance for {} already exists",
                    schedule.key(),
                    trigger
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// 终止全部活跃实例 (最老的先)
    ///
    /// 删除带版本前置条件: 实例在这期间被外部改动会得到 Conflict，本轮放弃重来。
    /// 已经不存在的实例视为终止成功。
    async fn terminate(&self, schedule: &Schedule, active: &[&Experiment]) -> Result<()> {
        for victim in active {
            let key = victim.key();
            let deleted = match self
                .ctx
                .store
                .delete_experiment(&key, Some(victim.meta.resource_version))
                .await
            {
                Ok(deleted) => deleted,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            if deleted {
                info!("[Reconciler] {} replaced {}", schedule.key(), key);
                self.ctx.recorder.record(
                    &schedule.key(),
                    Event::normal(
                        EventReason::InstanceReplaced,
                        format!("Terminated active experiment {}", key.name),
                    ),
                );
            }
        }
        Ok(())
    }
}
