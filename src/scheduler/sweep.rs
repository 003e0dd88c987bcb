use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::{
    common::{
        ObjectKey, Result,
        model::{LABEL_MANAGED_BY, MANAGER_NAME},
    },
    driver::{DriverContext, Event, EventReason},
    persistence::ListFilter,
};

/// 孤儿清扫器
///
/// 存储没有原生级联删除时，由 Driver 周期调用。
/// 属主 Schedule 不存在，或同名 Schedule 已被重建 (UID 不同) 的实例都算孤儿。
#[derive(Clone)]
pub struct OrphanSweeper {
    ctx: DriverContext,
}

impl OrphanSweeper {
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx }
    }

    /// 执行一轮清扫，返回删除的实例数
    pub async fn sweep(&self) -> Result<usize> {
        let ctx = &self.ctx;

        // 先列实例再列 Schedule: 之后新建的 Schedule 的实例不会出现在本轮列表里
        let filter = ListFilter::default().with_label(LABEL_MANAGED_BY, MANAGER_NAME);
        let experiments = ctx.store.list_experiments(&filter).await?;
        let live: HashMap<ObjectKey, String> = ctx
            .store
            .list_schedules(None)
            .await?
            .into_iter()
            .map(|s| (s.key(), s.meta.uid))
            .collect();

        let mut removed = 0;
        for exp in experiments {
            let owner = ObjectKey::new(exp.meta.namespace.clone(), exp.owner.name.clone());
            if live.get(&owner) == Some(&exp.owner.uid) {
                continue;
            }

            let key = exp.key();
            match ctx
                .store
                .delete_experiment(&key, Some(exp.meta.resource_version))
                .await
            {
                Ok(true) => {
                    info!("[Sweeper] Deleted orphan {} (owner {} is gone)", key, owner);
                    removed += 1;
                    ctx.metrics.inc_orphan_deleted();
                    ctx.recorder.record(
                        &owner,
                        Event::normal(
                            EventReason::OrphanDeleted,
                            format!("Deleted orphaned experiment {}", key.name),
                        ),
                    );
                }
                Ok(false) => {}
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!("[Sweeper] {} changed during sweep, next round: {}", key, e);
                }
                Err(e) => warn!("[Sweeper] Failed to delete orphan {}: {}", key, e),
            }
        }

        if removed > 0 {
            debug!("[Sweeper] Sweep removed {} orphan(s)", removed);
        }
        Ok(removed)
    }
}
