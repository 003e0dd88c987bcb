use std::sync::Arc;

use crate::{
    common::{Experiment, Result, Schedule},
    persistence::{ListFilter, ObjectStore},
};

/// 活跃实例查询
///
/// 只读组件。结果是调用时刻的观测值，可能滞后于存储；
/// 真正的去重由存储侧的创建冲突 (AlreadyExists) 兜底。
#[derive(Clone)]
pub struct ActiveLister {
    store: Arc<dyn ObjectStore>,
}

impl ActiveLister {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// 属于该 Schedule 的全部实例 (所有阶段)
    ///
    /// 按 UID 匹配属主，同名重建的 Schedule 不会认领旧实例。
    pub async fn list_owned(&self, schedule: &Schedule) -> Result<Vec<Experiment>> {
        let filter = ListFilter::in_namespace(schedule.meta.namespace.clone())
            .owned_by(schedule.meta.uid.clone());
        self.store.list_experiments(&filter).await
    }

    /// 处于非终态的实例
    pub async fn list_active(&self, schedule: &Schedule) -> Result<Vec<Experiment>> {
        let owned = self.list_owned(schedule).await?;
        Ok(owned.into_iter().filter(Experiment::is_active).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        ExperimentPhase, ExperimentStatus, ExperimentTemplate, ObjectMeta, ScheduleSpec,
        SchedulerConfig,
    };
    use crate::persistence::MemoryPersistence;
    use chrono::Utc;

    fn instance(schedule: &Schedule, name: &str) -> Experiment {
        Experiment {
            meta: ObjectMeta::new(schedule.meta.namespace.clone(), name),
            owner: schedule.owner_reference(),
            scheduled_time: Utc::now(),
            template: schedule.spec.template.clone(),
            status: ExperimentStatus::default(),
        }
    }

    #[tokio::test]
    async fn filters_by_owner_uid_and_phase() {
        let store = Arc::new(MemoryPersistence::new(&SchedulerConfig::default()));
        let spec = ScheduleSpec::new("@hourly", ExperimentTemplate::pod_kill(&[("app", "web")]));
        let mine = store
            .create_schedule(Schedule::new("chaos", "mine", spec.clone()))
            .await
            .unwrap();
        let other = store
            .create_schedule(Schedule::new("chaos", "other", spec))
            .await
            .unwrap();

        let running = store.create_experiment(instance(&mine, "mine-1")).await.unwrap();
        let done = store.create_experiment(instance(&mine, "mine-2")).await.unwrap();
        store.create_experiment(instance(&other, "other-1")).await.unwrap();
        store
            .update_experiment_status(
                &done.key(),
                done.meta.resource_version,
                ExperimentStatus {
                    phase: ExperimentPhase::Succeeded,
                    finished_at: None,
                },
            )
            .await
            .unwrap();

        let lister = ActiveLister::new(store);
        let owned = lister.list_owned(&mine).await.unwrap();
        assert_eq!(owned.len(), 2);

        let active = lister.list_active(&mine).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key(), running.key());
    }
}
