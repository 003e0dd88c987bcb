use rand::Rng;
use std::time::Duration;

use crate::policy::{WaitContext, WaitDecision, WaitStrategy};

/// 空闲指数退避策略
///
/// - 随着连续空闲次数增加，等待时间呈指数级增长。
/// - 总是允许被通知提前唤醒，所以退避只影响“没有任何事情发生”时的空转频率。
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    /// 创建退避策略
    ///
    /// # 参数
    /// - `min_ms`: 最小等待时间 (忙时/初始值)
    /// - `max_ms`: 最大等待时间 (封顶值)
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms.max(min_ms)),
            factor: 2.0,
            jitter: false,
        }
    }

    /// 开启随机抖动 (Jitter)
    ///
    /// 多个拉取协程同时空闲时，避免它们在同一时刻醒来。
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn calculate_duration(&self, idle_count: u32) -> Duration {
        if idle_count == 0 {
            return self.min;
        }

        // 1. 指数计算: min * factor^(idle_count - 1)，指数封顶 30 防止溢出
        let exponent = (idle_count - 1).min(30) as i32;
        let mut secs = self.min.as_secs_f64() * self.factor.powi(exponent);

        // 2. 抖动: [0.8 * secs, 1.2 * secs]
        if self.jitter && secs > 0.0 {
            secs *= rand::rng().random_range(0.8..1.2);
        }

        // 3. 封顶
        Duration::from_secs_f64(secs).min(self.max)
    }
}

impl WaitStrategy for ExponentialBackoff {
    fn make_decision(&self, ctx: &WaitContext) -> WaitDecision {
        // 刚处理完一个 Key，队列里很可能还有，趁热继续拉
        if ctx.idle_count == 0 {
            return WaitDecision::Immediate;
        }
        let duration = self.calculate_duration(ctx.idle_count);
        WaitDecision::WaitForNotification(ctx.now_instant + duration)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(10, 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn grows_then_caps() {
        let policy = ExponentialBackoff::new(10, 100);
        assert_eq!(policy.calculate_duration(0), Duration::from_millis(10));
        assert_eq!(policy.calculate_duration(1), Duration::from_millis(10));
        assert_eq!(policy.calculate_duration(3), Duration::from_millis(40));
        assert_eq!(policy.calculate_duration(10), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_under_cap() {
        let policy = ExponentialBackoff::new(10, 100).with_jitter();
        for idle in 0..40 {
            assert!(policy.calculate_duration(idle) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn decision_is_interruptible() {
        let policy = ExponentialBackoff::default();
        let now = Instant::now();
        assert_eq!(
            policy.make_decision(&WaitContext::new(0, now)),
            WaitDecision::Immediate
        );
        let decision = policy.make_decision(&WaitContext::new(2, now));
        assert_eq!(
            decision,
            WaitDecision::WaitForNotification(now + Duration::from_millis(20))
        );
    }
}
