use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::model::{Experiment, ObjectKey, OwnerReference};

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// 存储变更通知
///
/// 由 `ObjectStore::subscribe` 广播。Driver 把它们映射回 Schedule Key 投递进队列。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Schedule {
        event: WatchEventType,
        key: ObjectKey,
    },
    Experiment {
        event: WatchEventType,
        key: ObjectKey,
        owner: OwnerReference,
    },
}

impl StoreEvent {
    /// 该变更应当唤醒的 Schedule
    ///
    /// 实验实例的变更 (例如外部引擎把它推进到终态) 会唤醒其属主。
    pub fn schedule_key(&self) -> ObjectKey {
        match self {
            StoreEvent::Schedule { key, .. } => key.clone(),
            StoreEvent::Experiment { key, owner, .. } => {
                ObjectKey::new(key.namespace.clone(), owner.name.clone())
            }
        }
    }
}

/// 实验实例列表过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub namespace: Option<String>,
    /// 属主 UID
    pub owner_uid: Option<String>,
    /// 必须全部匹配的标签
    pub labels: BTreeMap<String, String>,
}

impl ListFilter {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn owned_by(mut self, uid: impl Into<String>) -> Self {
        self.owner_uid = Some(uid.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, exp: &Experiment) -> bool {
        if let Some(ns) = &self.namespace {
            if &exp.meta.namespace != ns {
                return false;
            }
        }
        if let Some(uid) = &self.owner_uid {
            if &exp.owner.uid != uid {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| exp.meta.labels.get(k) == Some(v))
    }
}
