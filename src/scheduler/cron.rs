use std::{str::FromStr, time::Duration};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use crate::common::{Result, SchedulerError, TimeUtils};

// ==========================================
// 1. 表达式解析
// ==========================================

/// 触发规则的内部形态
#[derive(Debug, Clone)]
enum TriggerKind {
    /// 日历表达式 (已统一为带秒的 6/7 段格式)
    ///
    /// 标准 5 段表达式同时限制日期和星期时拆成两条，任一匹配即触发。
    Cron(Vec<CronSchedule>),
    /// 固定间隔，锚定在上次触发 (或创建) 时间
    Every(Duration),
}

/// 已解析的触发表达式
///
/// 纯计算对象: 不读时钟、不做 IO。`now` 和锚点都由调用方传入。
#[derive(Debug, Clone)]
pub struct TriggerSchedule {
    expr: String,
    kind: TriggerKind,
    tz: Tz,
}

/// 追赶策略参数
#[derive(Debug, Clone, Copy)]
pub struct CatchUp {
    /// 追赶截止时间
    /// - None: 总是合并为最近一次。
    /// - Some: 距上次触发不超过此值时返回全部遗漏点。
    pub deadline: Option<Duration>,
    /// 单次扫描的最大触发点数
    pub max_scan: usize,
    /// 合并后的追赶点紧跟着下一次触发时，直接丢弃追赶点
    pub suppress_within: Option<Duration>,
}

impl Default for CatchUp {
    fn default() -> Self {
        Self {
            deadline: None,
            max_scan: 1000,
            suppress_within: None,
        }
    }
}

/// 一次触发计算的结果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Evaluation {
    /// 到期且尚未触发的时间点 (升序)
    pub due: Vec<DateTime<Utc>>,
    /// now 之后的下一次预计触发
    pub next: Option<DateTime<Utc>>,
}

impl Evaluation {
    /// 唯一可执行的触发点 (最近的一个)
    pub fn actionable(&self) -> Option<DateTime<Utc>> {
        self.due.last().copied()
    }
}

impl TriggerSchedule {
    /// 解析触发表达式
    ///
    /// - `tz`: IANA 时区名，None 表示 UTC。
    /// - 表达式或时区无效时返回 `InvalidExpression`。
    pub fn parse(expr: &str, tz: Option<&str>) -> Result<Self> {
        let invalid = |reason: String| SchedulerError::InvalidExpression {
            expr: expr.to_string(),
            reason,
        };

        let tz: Tz = match tz.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => name
                .parse()
                .map_err(|_| invalid(format!("unknown time zone '{}'", name)))?,
            None => chrono_tz::UTC,
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }

        let kind = if let Some(raw) = trimmed.strip_prefix("@every") {
            let interval = TimeUtils::parse_duration(raw).map_err(invalid)?;
            if interval.is_zero() {
                return Err(invalid("@every interval must be positive".to_string()));
            }
            // 实例名精确到秒: 间隔截断为整秒，最短 1s
            TriggerKind::Every(Duration::from_secs(interval.as_secs().max(1)))
        } else {
            let schedules = normalize(trimmed)
                .map_err(invalid)?
                .iter()
                .map(|n| CronSchedule::from_str(n).map_err(|e| invalid(e.to_string())))
                .collect::<Result<Vec<_>>>()?;
            TriggerKind::Cron(schedules)
        };

        Ok(Self {
            expr: trimmed.to_string(),
            kind,
            tz,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// 计算遗漏的触发点
    ///
    /// - `origin`: 上次触发时间；从未触发过时为 Schedule 的创建时间。
    /// - 遗漏区间为 `(origin, now]`。
    pub fn evaluate(
        &self,
        origin: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &CatchUp,
    ) -> Evaluation {
        let next = self.next_from(origin, now);
        if now <= origin {
            return Evaluation { due: Vec::new(), next };
        }

        let gap = TimeUtils::until(origin, now);
        let keep_all = matches!(policy.deadline, Some(deadline) if gap <= deadline);
        let limit = policy.max_scan.max(1);

        let mut due = if keep_all {
            let (found, overflowed) = self.scan(origin, origin, now, limit);
            if overflowed {
                // 截断后的列表不含最近一次，退化为合并
                self.latest_between(origin, now, limit)
                    .into_iter()
                    .collect()
            } else {
                found
            }
        } else {
            self.latest_between(origin, now, limit)
                .into_iter()
                .collect()
        };

        // 追赶点之后马上就有一次触发: 让它按自己的节奏执行
        // 只作用于真正的追赶 (遗漏了不止一个触发点)，准点触发不受影响
        if let (Some(window), Some(upcoming), Some(latest)) =
            (policy.suppress_within, next, due.last().copied())
        {
            let missed_several = self
                .instants_after(origin, origin)
                .next()
                .is_some_and(|first| first < latest);
            if missed_several && TimeUtils::until(now, upcoming) <= window {
                due.clear();
            }
        }

        Evaluation { due, next }
    }

    /// now 之后的下一次触发
    ///
    /// `@every` 没有锚点时以 now 为锚。
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_from(now, now)
    }

    // ==========================================
    // 2. 内部计算
    // ==========================================

    fn next_from(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.instants_after(anchor, now).next()
    }

    /// 扫描 `(start, end]` 内的触发点，最多 `limit` 个
    ///
    /// 返回值第二项表示是否还有更多未扫描到的触发点。
    fn scan(
        &self,
        anchor: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> (Vec<DateTime<Utc>>, bool) {
        let mut found = Vec::new();
        for t in self.instants_after(anchor, start) {
            if t > end {
                return (found, false);
            }
            if found.len() == limit {
                return (found, true);
            }
            found.push(t);
        }
        (found, false)
    }

    /// `(origin, now]` 内最近的一个触发点
    ///
    /// 从 now 往回以倍增窗口查找，避免长时间停机后从 origin 逐个扫描。
    fn latest_between(
        &self,
        origin: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Option<DateTime<Utc>> {
        if let TriggerKind::Every(interval) = &self.kind {
            let step = TimeUtils::to_delta(*interval);
            let n = steps_between(origin, now, step)?;
            if n == 0 {
                return None;
            }
            return nth_step(origin, step, n);
        }

        let mut window = TimeDelta::seconds(1);
        loop {
            let start = now
                .checked_sub_signed(window)
                .map_or(origin, |s| s.max(origin));

            let mut cursor = start;
            let mut latest = None;
            loop {
                let (found, overflowed) = self.scan(origin, cursor, now, limit);
                if let Some(last) = found.last() {
                    latest = Some(*last);
                    cursor = *last;
                }
                if !overflowed {
                    break;
                }
            }
            if latest.is_some() || start == origin {
                return latest;
            }
            window = window.checked_mul(2).unwrap_or(TimeDelta::MAX);
        }
    }

    /// `start` 之后的触发点 (升序，不含 start)
    ///
    /// 夏令时:
    /// - 回拨造成的重复本地时间只触发较早的一次。
    /// - 拨快跳过的本地时间当天不触发。
    fn instants_after(
        &self,
        anchor: DateTime<Utc>,
        start: DateTime<Utc>,
    ) -> Box<dyn Iterator<Item = DateTime<Utc>> + '_> {
        match &self.kind {
            TriggerKind::Cron(schedules) => {
                let tz = self.tz;
                let local = start.with_timezone(&tz);
                let mut streams: Vec<_> = schedules
                    .iter()
                    .map(|s| {
                        s.after(&local)
                            .filter(move |t| is_first_occurrence(tz, t))
                            .peekable()
                    })
                    .collect();
                // 多路归并，两条同时命中的时间点只出一次
                Box::new(std::iter::from_fn(move || {
                    let next = streams.iter_mut().filter_map(|s| s.peek().cloned()).min()?;
                    for stream in streams.iter_mut() {
                        stream.next_if_eq(&next);
                    }
                    Some(next.with_timezone(&Utc))
                }))
            }
            TriggerKind::Every(interval) => {
                let step = TimeUtils::to_delta(*interval);
                let first = steps_between(anchor, start, step).unwrap_or(0) + 1;
                Box::new((first..).map_while(move |k| nth_step(anchor, step, k)))
            }
        }
    }
}

/// 本地时间有两个对应时刻时，`t` 是否为较早的那个
fn is_first_occurrence(tz: Tz, t: &DateTime<Tz>) -> bool {
    tz.from_local_datetime(&t.naive_local())
        .earliest()
        .is_none_or(|first| first == *t)
}

/// `anchor + step * n`
fn nth_step(anchor: DateTime<Utc>, step: TimeDelta, n: i64) -> Option<DateTime<Utc>> {
    let ms = step.num_milliseconds().checked_mul(n)?;
    anchor.checked_add_signed(TimeDelta::try_milliseconds(ms)?)
}

/// `(anchor, now]` 内完整间隔的个数
fn steps_between(anchor: DateTime<Utc>, now: DateTime<Utc>, step: TimeDelta) -> Option<i64> {
    let step_ms = step.num_milliseconds();
    if step_ms <= 0 || now < anchor {
        return None;
    }
    Some((now - anchor).num_milliseconds() / step_ms)
}

// ==========================================
// 3. 表达式规范化
// ==========================================

/// 把各种写法统一为 cron crate 接受的带秒格式
///
/// 通常只有一条；5 段表达式的日期和星期都有限制时返回两条
/// (日期一条、星期一条)，两者取并集。
fn normalize(expr: &str) -> std::result::Result<Vec<String>, String> {
    if let Some(descriptor) = expr.strip_prefix('@') {
        let mapped = match descriptor.to_ascii_lowercase().as_str() {
            "yearly" | "annually" => "0 0 0 1 1 *",
            "monthly" => "0 0 0 1 * *",
            "weekly" => "0 0 0 * * 1",
            "daily" | "midnight" => "0 0 0 * * *",
            "hourly" => "0 0 * * * *",
            other => return Err(format!("unknown descriptor '@{}'", other)),
        };
        return Ok(vec![mapped.to_string()]);
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => {
            let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
            let dow = translate_dow(fields[4])?;
            if is_restricted(dom) && is_restricted(fields[4]) {
                Ok(vec![
                    format!("0 {} {} {} {} *", minute, hour, dom, month),
                    format!("0 {} {} * {} {}", minute, hour, month, dow),
                ])
            } else {
                Ok(vec![format!(
                    "0 {} {} {} {} {}",
                    minute, hour, dom, month, dow
                )])
            }
        }
        6 | 7 => Ok(vec![fields.join(" ")]),
        n => Err(format!("expected 5, 6 or 7 fields, got {}", n)),
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// 标准 cron 的星期 (0-7，0 和 7 都是周日) -> cron crate 的星期 (1-7，1 是周日)
fn translate_dow(field: &str) -> std::result::Result<String, String> {
    let parts = field
        .split(',')
        .map(translate_dow_item)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn translate_dow_item(item: &str) -> std::result::Result<String, String> {
    let (base, step) = match item.split_once('/') {
        Some((b, s)) => (b, Some(s)),
        None => (item, None),
    };
    let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

    // 星号、问号、英文缩写与 cron crate 语义一致
    if !base.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(item.to_string());
    }

    let day = |raw: &str| -> std::result::Result<u32, String> {
        let n: u32 = raw
            .parse()
            .map_err(|_| format!("invalid day of week '{}'", raw))?;
        if n > 7 {
            return Err(format!("day of week out of range: {}", n));
        }
        Ok(n)
    };

    let range = match base.split_once('-') {
        Some((a, b)) => Some((day(a)?, day(b)?)),
        // `n/step` 即 `n-7/step`
        None if step.is_some() => Some((day(base)?, 7)),
        None => None,
    };

    match range {
        None => {
            let n = day(base)?;
            Ok(format!("{}{}", n % 7 + 1, suffix))
        }
        Some((a, b)) => {
            if a > b {
                return Err(format!("invalid day of week range {}-{}", a, b));
            }
            if b < 7 {
                return Ok(format!("{}-{}{}", a + 1, b + 1, suffix));
            }
            // 以周日 (7) 结尾的区间: 周日折回 1
            match a {
                0 => Ok(format!("1-7{}", suffix)),
                7 => Ok("1".to_string()),
                _ => {
                    let step_n: u32 = step.and_then(|s| s.parse().ok()).unwrap_or(1);
                    let tail = format!("{}-7{}", a + 1, suffix);
                    if step_n > 0 && (7 - a) % step_n == 0 {
                        Ok(format!("{},1", tail))
                    } else {
                        Ok(tail)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn collapses_missed_minutes_to_latest() {
        let sched = TriggerSchedule::parse("* * * * *", None).unwrap();
        let last = t(10, 0, 0);
        let now = last + TimeDelta::seconds(185);

        let eval = sched.evaluate(last, now, &CatchUp::default());
        assert_eq!(eval.due, vec![t(10, 3, 0)]);
        assert_eq!(eval.next, Some(t(10, 4, 0)));
    }

    #[test]
    fn within_deadline_keeps_every_missed_instant() {
        let sched = TriggerSchedule::parse("* * * * *", None).unwrap();
        let policy = CatchUp {
            deadline: Some(Duration::from_secs(600)),
            ..CatchUp::default()
        };
        let eval = sched.evaluate(t(10, 0, 0), t(10, 3, 5), &policy);
        assert_eq!(eval.due, vec![t(10, 1, 0), t(10, 2, 0), t(10, 3, 0)]);
        assert_eq!(eval.actionable(), Some(t(10, 3, 0)));
    }

    #[test]
    fn beyond_deadline_collapses() {
        let sched = TriggerSchedule::parse("* * * * *", None).unwrap();
        let policy = CatchUp {
            deadline: Some(Duration::from_secs(60)),
            ..CatchUp::default()
        };
        let eval = sched.evaluate(t(10, 0, 0), t(10, 3, 5), &policy);
        assert_eq!(eval.due, vec![t(10, 3, 0)]);
    }

    #[test]
    fn nothing_due_before_first_instant() {
        let sched = TriggerSchedule::parse("0 * * * *", None).unwrap();
        let eval = sched.evaluate(t(10, 0, 0), t(10, 30, 0), &CatchUp::default());
        assert!(eval.due.is_empty());
        assert_eq!(eval.next, Some(t(11, 0, 0)));
    }

    #[test]
    fn long_outage_still_finds_latest() {
        let sched = TriggerSchedule::parse("*/1 * * * * *", None).unwrap();
        let origin = t(0, 0, 0);
        let now = t(9, 0, 0);
        let policy = CatchUp {
            max_scan: 50,
            ..CatchUp::default()
        };
        let eval = sched.evaluate(origin, now, &policy);
        assert_eq!(eval.due, vec![now]);
    }

    #[test]
    fn deadline_overflow_degrades_to_latest() {
        let sched = TriggerSchedule::parse("* * * * *", None).unwrap();
        let policy = CatchUp {
            deadline: Some(Duration::from_secs(86_400)),
            max_scan: 5,
            suppress_within: None,
        };
        let eval = sched.evaluate(t(10, 0, 0), t(11, 0, 30), &policy);
        assert_eq!(eval.due, vec![t(11, 0, 0)]);
    }

    #[test]
    fn imminent_trigger_suppresses_catch_up() {
        let sched = TriggerSchedule::parse("*/10 * * * *", None).unwrap();
        let policy = CatchUp {
            suppress_within: Some(Duration::from_secs(120)),
            ..CatchUp::default()
        };
        // 10:30 已错过，10:40 还差 60s
        let eval = sched.evaluate(t(10, 0, 0), t(10, 39, 0), &policy);
        assert!(eval.due.is_empty());
        assert_eq!(eval.next, Some(t(10, 40, 0)));

        // 距离下一次还远: 照常追赶
        let eval = sched.evaluate(t(10, 0, 0), t(10, 31, 0), &policy);
        assert_eq!(eval.due, vec![t(10, 30, 0)]);
    }

    #[test]
    fn on_time_trigger_is_never_suppressed() {
        let sched = TriggerSchedule::parse("* * * * *", None).unwrap();
        let policy = CatchUp {
            suppress_within: Some(Duration::from_secs(300)),
            ..CatchUp::default()
        };
        let eval = sched.evaluate(t(10, 0, 0), t(10, 1, 2), &policy);
        assert_eq!(eval.due, vec![t(10, 1, 0)]);
    }

    #[yare::parameterized(
        yearly   = { "@yearly",   "0 0 0 1 1 *" },
        annually = { "@annually", "0 0 0 1 1 *" },
        monthly  = { "@monthly",  "0 0 0 1 * *" },
        weekly   = { "@weekly",   "0 0 0 * * 1" },
        daily    = { "@daily",    "0 0 0 * * *" },
        midnight = { "@midnight", "0 0 0 * * *" },
        hourly   = { "@hourly",   "0 0 * * * *" },
        five     = { "30 2 * * *", "0 30 2 * * *" },
        six      = { "15 30 2 * * *", "15 30 2 * * *" },
    )]
    fn normalizes_expressions(input: &str, expected: &str) {
        assert_eq!(normalize(input).unwrap(), vec![expected.to_string()]);
    }

    #[test]
    fn restricted_day_of_month_and_week_split_in_two() {
        assert_eq!(
            normalize("0 0 1 * 1").unwrap(),
            vec!["0 0 0 1 * *".to_string(), "0 0 0 * * 2".to_string()]
        );
        assert_eq!(normalize("0 0 */2 * 1").unwrap().len(), 2);
        assert_eq!(normalize("0 0 ? * 1").unwrap().len(), 1);
    }

    #[test]
    fn day_of_month_or_day_of_week_fires() {
        let sched = TriggerSchedule::parse("0 0 1 * 1", None).unwrap();
        // 2026-06-02 周二 -> 下周一
        let tuesday = Utc.with_ymd_and_hms(2026, 6, 2, 12, 0, 0).unwrap();
        assert_eq!(
            sched.next_after(tuesday),
            Some(Utc.with_ymd_and_hms(2026, 6, 8, 0, 0, 0).unwrap())
        );
        // 2026-06-29 周一 -> 7 月 1 日 (周三)
        let monday = Utc.with_ymd_and_hms(2026, 6, 29, 12, 0, 0).unwrap();
        assert_eq!(
            sched.next_after(monday),
            Some(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn instant_matching_both_fields_fires_once() {
        // 2026-06-01 既是 1 号又是周一
        let sched = TriggerSchedule::parse("0 0 1 * 1", None).unwrap();
        let policy = CatchUp {
            deadline: Some(Duration::from_secs(7 * 86_400)),
            ..CatchUp::default()
        };
        let origin = Utc.with_ymd_and_hms(2026, 5, 31, 12, 0, 0).unwrap();
        let eval = sched.evaluate(origin, t(12, 0, 0), &policy);
        assert_eq!(eval.due, vec![t(0, 0, 0)]);
        assert_eq!(
            eval.next,
            Some(Utc.with_ymd_and_hms(2026, 6, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn repeated_local_time_fires_once_on_fall_back() {
        // 纽约 2026-11-01 02:00 EDT 回拨到 01:00 EST
        let sched = TriggerSchedule::parse("30 1 * * *", Some("America/New_York")).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 11, 1, 4, 0, 0).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap();
        assert_eq!(sched.next_after(before), Some(first));
        assert_eq!(
            sched.next_after(first),
            Some(Utc.with_ymd_and_hms(2026, 11, 2, 6, 30, 0).unwrap())
        );

        let policy = CatchUp {
            deadline: Some(Duration::from_secs(86_400)),
            ..CatchUp::default()
        };
        let eval = sched.evaluate(before, before + TimeDelta::hours(4), &policy);
        assert_eq!(eval.due, vec![first]);
    }

    #[test]
    fn skipped_local_time_does_not_fire_that_day() {
        // 纽约 2026-03-08 02:00 EST 拨快到 03:00 EDT
        let sched = TriggerSchedule::parse("30 2 * * *", Some("America/New_York")).unwrap();
        let after_march_7 = Utc.with_ymd_and_hms(2026, 3, 7, 8, 0, 0).unwrap();
        assert_eq!(
            sched.next_after(after_march_7),
            Some(Utc.with_ymd_and_hms(2026, 3, 9, 6, 30, 0).unwrap())
        );
    }

    #[test]
    fn every_is_truncated_to_whole_seconds() {
        let origin = t(10, 0, 0);
        let policy = CatchUp {
            deadline: Some(Duration::from_secs(60)),
            ..CatchUp::default()
        };

        let sub_second = TriggerSchedule::parse("@every 500ms", None).unwrap();
        let eval = sub_second.evaluate(origin, origin + TimeDelta::milliseconds(2500), &policy);
        assert_eq!(
            eval.due,
            vec![origin + TimeDelta::seconds(1), origin + TimeDelta::seconds(2)]
        );

        let fractional = TriggerSchedule::parse("@every 1500ms", None).unwrap();
        let eval = fractional.evaluate(origin, origin + TimeDelta::milliseconds(2500), &policy);
        assert_eq!(
            eval.due,
            vec![origin + TimeDelta::seconds(1), origin + TimeDelta::seconds(2)]
        );
    }

    #[yare::parameterized(
        sunday_zero  = { "0",     "1" },
        sunday_seven = { "7",     "1" },
        monday       = { "1",     "2" },
        weekdays     = { "1-5",   "2-6" },
        whole_week   = { "0-7",   "1-7" },
        to_sunday    = { "5-7",   "6-7,1" },
        list         = { "0,6",   "1,7" },
        star         = { "*",     "*" },
        step         = { "*/2",   "*/2" },
        single_step  = { "1/2",   "2-7/2,1" },
        sunday_step  = { "0/3",   "1-7/3" },
        names        = { "MON-FRI", "MON-FRI" },
    )]
    fn translates_day_of_week(input: &str, expected: &str) {
        assert_eq!(translate_dow(input).unwrap(), expected);
    }

    #[test]
    fn weekly_descriptor_fires_on_sunday() {
        let sched = TriggerSchedule::parse("@weekly", None).unwrap();
        // 2026-06-01 是周一
        let next = sched.next_after(t(12, 0, 0)).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!((next.hour(), next.minute()), (0, 0));
    }

    #[test]
    fn standard_weekday_range_maps_to_monday_through_friday() {
        let sched = TriggerSchedule::parse("0 9 * * 1-5", None).unwrap();
        // 周六 -> 下周一
        let saturday = Utc.with_ymd_and_hms(2026, 6, 6, 12, 0, 0).unwrap();
        let next = sched.next_after(saturday).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn evaluates_in_schedule_time_zone() {
        // 东京 09:00 = UTC 00:00
        let sched = TriggerSchedule::parse("0 9 * * *", Some("Asia/Tokyo")).unwrap();
        let next = sched.next_after(t(12, 0, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn every_is_anchored_on_origin() {
        let sched = TriggerSchedule::parse("@every 90s", None).unwrap();
        let origin = t(10, 0, 0);

        let eval = sched.evaluate(origin, origin + TimeDelta::seconds(200), &CatchUp::default());
        assert_eq!(eval.due, vec![origin + TimeDelta::seconds(180)]);
        assert_eq!(eval.next, Some(origin + TimeDelta::seconds(270)));

        let policy = CatchUp {
            deadline: Some(Duration::from_secs(3600)),
            ..CatchUp::default()
        };
        let eval = sched.evaluate(origin, origin + TimeDelta::seconds(200), &policy);
        assert_eq!(
            eval.due,
            vec![
                origin + TimeDelta::seconds(90),
                origin + TimeDelta::seconds(180)
            ]
        );
    }

    #[yare::parameterized(
        garbage       = { "not a cron", None },
        too_few       = { "* * *", None },
        bad_dow       = { "0 0 * * 9", None },
        bad_every     = { "@every soon", None },
        zero_every    = { "@every 0s", None },
        bad_desc      = { "@fortnightly", None },
        bad_tz        = { "* * * * *", Some("Mars/Olympus") },
        empty         = { "   ", None },
    )]
    fn rejects_invalid(expr: &str, tz: Option<&str>) {
        let err = TriggerSchedule::parse(expr, tz).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidExpression { .. }));
        assert!(!err.is_retryable());
    }
}
