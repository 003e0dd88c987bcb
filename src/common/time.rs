use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

/// 时钟源
///
/// 全系统统一通过这个接口获取“现在”，Reconciler 与 Store 都不直接读系统时间，
/// 方便在测试里冻结或拨动时间。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟 (默认)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟
///
/// 只有调用 `set` / `advance` 时才会走动。Clone 之后共享同一个时间点。
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += TimeUtils::to_delta(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// 时间换算工具
pub struct TimeUtils;

impl TimeUtils {
    /// std Duration -> chrono TimeDelta (溢出时封顶)
    pub fn to_delta(d: Duration) -> TimeDelta {
        TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
    }

    /// 计算 `later - earlier`，为负时返回 0
    pub fn until(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
        (later - earlier).to_std().unwrap_or(Duration::ZERO)
    }

    /// 解析时长字符串
    ///
    /// - 支持复合写法: `1h30m`、`2m30s`、`500ms`、`1d`
    /// - 纯数字按秒处理: `90` = 90s
    /// - 单位: ms / s / m / h / d
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty duration string".to_string());
        }
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        let mut total = Duration::ZERO;
        let mut rest = s;
        while !rest.is_empty() {
            // 1. 数字部分
            let split = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| format!("missing unit in duration: {}", s))?;
            if split == 0 {
                return Err(format!("invalid number in duration: {}", s));
            }
            let num: u64 = rest[..split]
                .parse()
                .map_err(|_| format!("invalid number in duration: {}", s))?;
            rest = &rest[split..];

            // 2. 单位部分 (到下一个数字为止)
            let unit_end = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let segment = match &rest[..unit_end] {
                "ms" => Duration::from_millis(num),
                "s" => Duration::from_secs(num),
                "m" => Duration::from_secs(num.saturating_mul(60)),
                "h" => Duration::from_secs(num.saturating_mul(3600)),
                "d" => Duration::from_secs(num.saturating_mul(86400)),
                other => return Err(format!("unknown duration suffix: {}", other)),
            };
            total = total.saturating_add(segment);
            rest = &rest[unit_end..];
        }
        Ok(total)
    }

    /// 解析带符号的时间偏移 (`-10m`、`+1h`、`30s`)
    pub fn parse_offset(s: &str) -> Result<TimeDelta, String> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let delta = Self::to_delta(Self::parse_duration(body)?);
        Ok(if negative { -delta } else { delta })
    }
}
