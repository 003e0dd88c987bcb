use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;

use super::{CascadeMode, MemoryPersistence, StoreOp};
use crate::common::error::{ResourceKind, Result, SchedulerError};
use crate::common::model::{
    Experiment, ExperimentStatus, ObjectKey, Schedule, ScheduleStatus,
};
use crate::common::new_uid;
use crate::persistence::model::{ListFilter, StoreEvent, WatchEventType};
use crate::persistence::traits::ObjectStore;

impl MemoryPersistence {
    /// 删除某个 Schedule 名下的全部实例 (原生级联)
    fn cascade_delete(&self, owner_uid: &str) {
        let victims: Vec<ObjectKey> = self
            .experiments
            .iter()
            .filter(|e| e.owner.uid == owner_uid)
            .map(|e| e.key().clone())
            .collect();

        for key in victims {
            if let Some((_, exp)) = self.experiments.remove(&key) {
                self.publish(StoreEvent::Experiment {
                    event: WatchEventType::Deleted,
                    key,
                    owner: exp.owner,
                });
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryPersistence {
    async fn get_schedule(&self, key: &ObjectKey) -> Result<Option<Schedule>> {
        self.check_fault(StoreOp::GetSchedule, key)?;
        Ok(self.schedules.get(key).map(|s| s.clone()))
    }

    async fn list_schedules(&self, namespace: Option<&str>) -> Result<Vec<Schedule>> {
        self.check_fault(StoreOp::ListSchedules, &ObjectKey::new("", ""))?;
        let mut items: Vec<Schedule> = self
            .schedules
            .iter()
            .filter(|s| namespace.is_none_or(|ns| s.meta.namespace == ns))
            .map(|s| s.clone())
            .collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(items)
    }

    async fn create_schedule(&self, mut schedule: Schedule) -> Result<Schedule> {
        let key = schedule.key();
        // entry API 保证“检查 + 插入”原子
        match self.schedules.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(SchedulerError::AlreadyExists {
                    kind: ResourceKind::Schedule,
                    key,
                });
            }
            Entry::Vacant(slot) => {
                schedule.meta.uid = new_uid();
                schedule.meta.resource_version = self.next_revision();
                schedule.meta.creation_timestamp = self.clock.now();
                slot.insert(schedule.clone());
            }
        }

        self.publish(StoreEvent::Schedule {
            event: WatchEventType::Added,
            key,
        });
        Ok(schedule)
    }

    async fn update_schedule(&self, schedule: Schedule) -> Result<Schedule> {
        let key = schedule.key();
        self.check_fault(StoreOp::UpdateSchedule, &key)?;

        let updated = {
            let mut current = self.schedules.get_mut(&key).ok_or_else(|| {
                SchedulerError::NotFound {
                    kind: ResourceKind::Schedule,
                    key: key.clone(),
                }
            })?;
            if current.meta.resource_version != schedule.meta.resource_version {
                return Err(SchedulerError::Conflict {
                    kind: ResourceKind::Schedule,
                    key,
                    expected: schedule.meta.resource_version,
                    actual: current.meta.resource_version,
                });
            }
            current.spec = schedule.spec;
            current.meta.labels = schedule.meta.labels;
            current.meta.resource_version = self.next_revision();
            current.clone()
        };

        self.publish(StoreEvent::Schedule {
            event: WatchEventType::Modified,
            key,
        });
        Ok(updated)
    }

    async fn update_schedule_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        status: ScheduleStatus,
    ) -> Result<Schedule> {
        self.check_fault(StoreOp::UpdateScheduleStatus, key)?;

        let updated = {
            let mut current = self.schedules.get_mut(key).ok_or_else(|| {
                SchedulerError::NotFound {
                    kind: ResourceKind::Schedule,
                    key: key.clone(),
                }
            })?;
            if current.meta.resource_version != expected_version {
                return Err(SchedulerError::Conflict {
                    kind: ResourceKind::Schedule,
                    key: key.clone(),
                    expected: expected_version,
                    actual: current.meta.resource_version,
                });
            }
            current.status = status;
            current.meta.resource_version = self.next_revision();
            current.clone()
        };

        self.publish(StoreEvent::Schedule {
            event: WatchEventType::Modified,
            key: key.clone(),
        });
        Ok(updated)
    }

    async fn delete_schedule(&self, key: &ObjectKey) -> Result<bool> {
        let Some((_, removed)) = self.schedules.remove(key) else {
            return Ok(false);
        };

        if self.cascade == CascadeMode::Native {
            self.cascade_delete(&removed.meta.uid);
        }

        self.publish(StoreEvent::Schedule {
            event: WatchEventType::Deleted,
            key: key.clone(),
        });
        Ok(true)
    }

    async fn get_experiment(&self, key: &ObjectKey) -> Result<Option<Experiment>> {
        Ok(self.experiments.get(key).map(|e| e.clone()))
    }

    async fn list_experiments(&self, filter: &ListFilter) -> Result<Vec<Experiment>> {
        let probe = ObjectKey::new(filter.namespace.clone().unwrap_or_default(), "");
        self.check_fault(StoreOp::ListExperiments, &probe)?;

        let mut items: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| {
            a.meta
                .creation_timestamp
                .cmp(&b.meta.creation_timestamp)
                .then_with(|| a.meta.name.cmp(&b.meta.name))
        });
        Ok(items)
    }

    async fn create_experiment(&self, mut experiment: Experiment) -> Result<Experiment> {
        let key = experiment.key();
        self.check_fault(StoreOp::CreateExperiment, &key)?;

        match self.experiments.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(SchedulerError::AlreadyExists {
                    kind: ResourceKind::Experiment,
                    key,
                });
            }
            Entry::Vacant(slot) => {
                experiment.meta.uid = new_uid();
                experiment.meta.resource_version = self.next_revision();
                experiment.meta.creation_timestamp = self.clock.now();
                slot.insert(experiment.clone());
            }
        }

        self.publish(StoreEvent::Experiment {
            event: WatchEventType::Added,
            key,
            owner: experiment.owner.clone(),
        });
        Ok(experiment)
    }

    async fn update_experiment_status(
        &self,
        key: &ObjectKey,
        expected_version: u64,
        mut status: ExperimentStatus,
    ) -> Result<Experiment> {
        let updated = {
            let mut current = self.experiments.get_mut(key).ok_or_else(|| {
                SchedulerError::NotFound {
                    kind: ResourceKind::Experiment,
                    key: key.clone(),
                }
            })?;
            if current.meta.resource_version != expected_version {
                return Err(SchedulerError::Conflict {
                    kind: ResourceKind::Experiment,
                    key: key.clone(),
                    expected: expected_version,
                    actual: current.meta.resource_version,
                });
            }

            // finished_at 只能写一次
            match (current.status.finished_at, status.finished_at) {
                (Some(old), Some(new)) if old != new => {
                    return Err(SchedulerError::Immutable {
                        kind: ResourceKind::Experiment,
                        key: key.clone(),
                        field: "finished_at",
                    });
                }
                (Some(old), None) => status.finished_at = Some(old),
                // 进入终态但没给结束时间，用存储时钟补上
                (None, None) if status.phase.is_terminal() => {
                    status.finished_at = Some(self.clock.now())
                }
                _ => {}
            }

            current.status = status;
            current.meta.resource_version = self.next_revision();
            current.clone()
        };

        self.publish(StoreEvent::Experiment {
            event: WatchEventType::Modified,
            key: key.clone(),
            owner: updated.owner.clone(),
        });
        Ok(updated)
    }

    async fn delete_experiment(&self, key: &ObjectKey, precondition: Option<u64>) -> Result<bool> {
        self.check_fault(StoreOp::DeleteExperiment, key)?;

        let removed = match precondition {
            Some(expected) => {
                let removed = self
                    .experiments
                    .remove_if(key, |_, e| e.meta.resource_version == expected);
                if removed.is_none() {
                    if let Some(current) = self.experiments.get(key) {
                        return Err(SchedulerError::Conflict {
                            kind: ResourceKind::Experiment,
                            key: key.clone(),
                            expected,
                            actual: current.meta.resource_version,
                        });
                    }
                }
                removed
            }
            None => self.experiments.remove(key),
        };

        let Some((_, exp)) = removed else {
            return Ok(false);
        };
        self.publish(StoreEvent::Experiment {
            event: WatchEventType::Deleted,
            key: key.clone(),
            owner: exp.owner,
        });
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn supports_cascade(&self) -> bool {
        self.cascade == CascadeMode::Native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::Clock;
    use crate::common::model::{ExperimentPhase, ScheduleSpec};
    use crate::common::{ExperimentTemplate, ManualClock, SchedulerConfig};
    use crate::persistence::FaultKind;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn store() -> (MemoryPersistence, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let store = MemoryPersistence::new(&SchedulerConfig::new_dev())
            .with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    fn schedule(name: &str) -> Schedule {
        Schedule::new(
            "default",
            name,
            ScheduleSpec::new("*/5 * * * *", ExperimentTemplate::pod_kill(&[("app", "web")])),
        )
    }

    async fn experiment_for(store: &MemoryPersistence, owner: &Schedule, name: &str) -> Experiment {
        let exp = Experiment {
            meta: crate::common::ObjectMeta::new("default", name),
            owner: owner.owner_reference(),
            scheduled_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            template: owner.spec.template.clone(),
            status: Default::default(),
        };
        store.create_experiment(exp).await.unwrap()
    }

    #[tokio::test]
    async fn create_assigns_identity_and_rejects_duplicates() {
        let (store, _) = store();
        let created = store.create_schedule(schedule("nightly")).await.unwrap();
        assert_eq!(created.meta.uid.len(), 21);
        assert!(created.meta.resource_version > 0);

        let err = store.create_schedule(schedule("nightly")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let (store, _) = store();
        let created = store.create_schedule(schedule("nightly")).await.unwrap();
        let key = created.key();

        let fresh = store
            .update_schedule_status(&key, created.meta.resource_version, ScheduleStatus::default())
            .await
            .unwrap();
        assert!(fresh.meta.resource_version > created.meta.resource_version);

        let err = store
            .update_schedule_status(&key, created.meta.resource_version, ScheduleStatus::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn finished_at_is_write_once() {
        let (store, clock) = store();
        let owner = store.create_schedule(schedule("nightly")).await.unwrap();
        let exp = experiment_for(&store, &owner, "nightly-1").await;

        let done = store
            .update_experiment_status(
                &exp.key(),
                exp.meta.resource_version,
                ExperimentStatus {
                    phase: ExperimentPhase::Succeeded,
                    finished_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status.finished_at, Some(clock.now()));

        clock.advance(std::time::Duration::from_secs(30));
        let err = store
            .update_experiment_status(
                &exp.key(),
                done.meta.resource_version,
                ExperimentStatus {
                    phase: ExperimentPhase::Succeeded,
                    finished_at: Some(clock.now()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Immutable { field: "finished_at", .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_honours_precondition() {
        let (store, _) = store();
        let owner = store.create_schedule(schedule("nightly")).await.unwrap();
        let exp = experiment_for(&store, &owner, "nightly-1").await;

        let err = store
            .delete_experiment(&exp.key(), Some(exp.meta.resource_version + 100))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        assert!(store
            .delete_experiment(&exp.key(), Some(exp.meta.resource_version))
            .await
            .unwrap());
        assert!(!store.delete_experiment(&exp.key(), None).await.unwrap());
    }

    #[tokio::test]
    async fn native_cascade_removes_owned_instances() {
        let (store, _) = store();
        let owner = store.create_schedule(schedule("nightly")).await.unwrap();
        let other = store.create_schedule(schedule("hourly")).await.unwrap();
        experiment_for(&store, &owner, "nightly-1").await;
        experiment_for(&store, &other, "hourly-1").await;

        store.delete_schedule(&owner.key()).await.unwrap();
        let left = store.list_experiments(&ListFilter::default()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].meta.name, "hourly-1");
    }

    #[tokio::test]
    async fn injected_fault_fires_then_clears() {
        let (store, _) = store();
        store.inject_fault(StoreOp::ListSchedules, FaultKind::Unavailable, 1);
        assert!(store.list_schedules(None).await.unwrap_err().is_retryable());
        assert!(store.list_schedules(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_are_broadcast() {
        let (store, _) = store();
        let mut rx = store.subscribe();
        let created = store.create_schedule(schedule("nightly")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.schedule_key(), created.key());
    }
}
