use dashmap::DashMap;
use std::time::Duration;

use crate::common::calculate_backoff;
use crate::common::model::ObjectKey;

/// 按 Key 的失败退避 (Per-Item Rate Limiter)
///
/// - 每个 Key 单独计数，连续失败越多，重排延迟越长 (带抖动)。
/// - Reconcile 成功后调用 `forget` 清零。
#[derive(Debug, Default)]
pub struct ItemBackoff {
    failures: DashMap<ObjectKey, u32>,
}

impl ItemBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次失败并返回本次应当等待的时长
    ///
    /// - `base` / `max`: 退避的下界与上界
    pub fn next_delay(&self, key: &ObjectKey, base: Duration, max: Duration) -> Duration {
        let attempt = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        calculate_backoff(attempt, base.as_secs_f64(), max.as_secs_f64())
    }

    /// 清除某个 Key 的失败记录
    pub fn forget(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// 当前连续失败次数
    pub fn retries(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_per_key() {
        let backoff = ItemBackoff::new();
        let a = ObjectKey::new("default", "a");
        let b = ObjectKey::new("default", "b");
        let base = Duration::from_millis(5);
        let max = Duration::from_secs(1);

        assert_eq!(backoff.next_delay(&a, base, max), base);
        let second = backoff.next_delay(&a, base, max);
        assert!(second >= base && second <= Duration::from_millis(10));
        assert_eq!(backoff.retries(&a), 2);
        assert_eq!(backoff.retries(&b), 0);

        backoff.forget(&a);
        assert_eq!(backoff.retries(&a), 0);
        assert_eq!(backoff.next_delay(&a, base, max), base);
    }
}
