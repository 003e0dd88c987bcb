use chrono::{DateTime, Utc};

use crate::common::model::ConcurrencyPolicy;

/// 并发策略的裁决结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 没有到期触发点
    NoAction,
    /// 创建新实例
    CreateNew { trigger: DateTime<Utc> },
    /// 跳过本次触发 (Forbid 且已有活跃实例)
    Skip { trigger: DateTime<Utc> },
    /// 先终止全部活跃实例 (最老的先)，再创建新实例
    ReplaceThenCreate { trigger: DateTime<Utc> },
}

impl Action {
    pub fn trigger(&self) -> Option<DateTime<Utc>> {
        match self {
            Action::NoAction => None,
            Action::CreateNew { trigger }
            | Action::Skip { trigger }
            | Action::ReplaceThenCreate { trigger } => Some(*trigger),
        }
    }
}

/// 并发策略裁决 (纯函数)
///
/// | 策略 | 活跃数 | 到期 | 动作 |
/// |---|---|---|---|
/// | Allow | 任意 | 是 | CreateNew |
/// | Forbid | 0 | 是 | CreateNew |
/// | Forbid | ≥1 | 是 | Skip |
/// | Replace | 0 | 是 | CreateNew |
/// | Replace | ≥1 | 是 | ReplaceThenCreate |
/// | 任意 | 任意 | 否 | NoAction |
///
/// - `due`: 调用方只传入最近的一个可执行触发点，更早的已被丢弃。
pub fn decide(policy: ConcurrencyPolicy, active: usize, due: Option<DateTime<Utc>>) -> Action {
    let Some(trigger) = due else {
        return Action::NoAction;
    };
    match (policy, active) {
        (ConcurrencyPolicy::Allow, _) => Action::CreateNew { trigger },
        (ConcurrencyPolicy::Forbid, 0) => Action::CreateNew { trigger },
        (ConcurrencyPolicy::Forbid, _) => Action::Skip { trigger },
        (ConcurrencyPolicy::Replace, 0) => Action::CreateNew { trigger },
        (ConcurrencyPolicy::Replace, _) => Action::ReplaceThenCreate { trigger },
    }
}
