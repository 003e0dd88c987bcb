use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::debug;

use crate::{
    common::{ObjectKey, Schedule, ScheduleSpec},
    persistence::ObjectStore,
    scheduler::cron::TriggerSchedule,
};

/// 乐观锁冲突时的最大重试次数
const MAX_UPDATE_ATTEMPTS: usize = 5;

/// Schedule 客户端
///
/// 外部参与者 (运维、CLI、测试) 使用的便捷 API: 校验后创建、带冲突重试地修改 Spec、删除。
/// 暂停 / 恢复只是对 `spec.suspend` 的一次修改。
pub struct ScheduleClient {
    store: Arc<dyn ObjectStore>,
}

impl ScheduleClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// 校验并创建 Schedule
    pub async fn create(&self, schedule: Schedule) -> anyhow::Result<Schedule> {
        // === 1. 数据完整性验证 ===
        if schedule.meta.name.trim().is_empty() {
            bail!("Schedule name cannot be empty");
        }
        let key = schedule.key();
        Self::validate_spec(&key, &schedule.spec)?;

        let created = self
            .store
            .create_schedule(schedule)
            .await
            .with_context(|| format!("failed to create schedule {}", key))?;
        debug!("[Client] Created schedule {}", key);
        Ok(created)
    }

    pub async fn get(&self, key: &ObjectKey) -> anyhow::Result<Option<Schedule>> {
        Ok(self.store.get_schedule(key).await?)
    }

    /// 修改 Spec (读 - 改 - 写，冲突时重新读取再试)
    ///
    /// `mutate` 可能被调用多次，每次拿到的都是最新的 Spec。
    pub async fn update_spec<F>(&self, key: &ObjectKey, mut mutate: F) -> anyhow::Result<Schedule>
    where
        F: FnMut(&mut ScheduleSpec),
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(mut current) = self.store.get_schedule(key).await? else {
                bail!("schedule {} not found", key);
            };
            let before = current.spec.clone();
            mutate(&mut current.spec);
            if current.spec == before {
                return Ok(current);
            }
            Self::validate_spec(key, &current.spec)?;

            match self.store.update_schedule(current).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() => {
                    debug!(
                        "[Client] Conflict updating {} (attempt {}), retrying",
                        key, attempt
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to update schedule {}", key));
                }
            }
        }
        bail!(
            "schedule {} kept changing, gave up after {} attempts",
            key,
            MAX_UPDATE_ATTEMPTS
        )
    }

    /// 暂停
    pub async fn pause(&self, key: &ObjectKey) -> anyhow::Result<Schedule> {
        self.update_spec(key, |spec| spec.suspend = true).await
    }

    /// 恢复
    pub async fn resume(&self, key: &ObjectKey) -> anyhow::Result<Schedule> {
        self.update_spec(key, |spec| spec.suspend = false).await
    }

    /// 删除 Schedule，返回是否真的删除了对象
    pub async fn delete(&self, key: &ObjectKey) -> anyhow::Result<bool> {
        self.store
            .delete_schedule(key)
            .await
            .with_context(|| format!("failed to delete schedule {}", key))
    }

    fn validate_spec(key: &ObjectKey, spec: &ScheduleSpec) -> anyhow::Result<()> {
        TriggerSchedule::parse(&spec.schedule, spec.time_zone.as_deref())
            .with_context(|| format!("invalid trigger for schedule {}", key))?;
        spec.template
            .validate()
            .with_context(|| format!("invalid template for schedule {}", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ExperimentTemplate, SchedulerConfig};
    use crate::persistence::MemoryPersistence;

    fn client() -> ScheduleClient {
        ScheduleClient::new(Arc::new(MemoryPersistence::new(&SchedulerConfig::default())))
    }

    fn spec(expr: &str) -> ScheduleSpec {
        ScheduleSpec::new(expr, ExperimentTemplate::pod_kill(&[("app", "api")]))
    }

    #[tokio::test]
    async fn rejects_invalid_expression_before_storing() {
        let client = client();
        let err = client
            .create(Schedule::new("chaos", "api", spec("every tuesday")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid trigger"));
        assert!(
            client
                .get(&ObjectKey::new("chaos", "api"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn pause_and_resume_bump_version() {
        let client = client();
        let created = client
            .create(Schedule::new("chaos", "api", spec("*/5 * * * *")))
            .await
            .unwrap();
        let key = created.key();

        let paused = client.pause(&key).await.unwrap();
        assert!(paused.spec.suspend);
        assert!(paused.meta.resource_version > created.meta.resource_version);

        // 重复暂停不产生写入
        let again = client.pause(&key).await.unwrap();
        assert_eq!(again.meta.resource_version, paused.meta.resource_version);

        let resumed = client.resume(&key).await.unwrap();
        assert!(!resumed.spec.suspend);
    }

    #[tokio::test]
    async fn update_missing_schedule_fails() {
        let client = client();
        let err = client
            .pause(&ObjectKey::new("chaos", "ghost"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
