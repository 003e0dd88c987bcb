use tokio::time::Instant;

/// 等待决策 (The Decision)
///
/// - 策略层返回给 Pacemaker 的具体行动指令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDecision {
    /// [立即拉取]
    ///
    /// - 行为: 直接返回，拉取协程立刻尝试 `acquire`。
    /// - 适用场景: 刚处理完一个 Key，队列里可能还有。
    Immediate,

    /// [协作让权]
    ///
    /// - 行为: `yield_now().await` 之后再拉取，给同一运行时上的其他协程让出执行权。
    Yield,

    /// [硬等待] 睡到指定时间点，期间忽略通知
    WaitUntil(Instant),

    /// [响应式等待]
    ///
    /// - 行为: `select!` 同时等待 `sleep_until(deadline)` 和 `notified()`，先到先醒。
    /// - 适用场景: 空闲时的默认等待方式。新 Key 入队会立刻唤醒。
    WaitForNotification(Instant),

    /// [死等] 只靠通知唤醒
    WaitIndefinitely,
}

impl WaitDecision {
    /// 决策中的截止时间 (若有)
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WaitDecision::WaitUntil(t) | WaitDecision::WaitForNotification(t) => Some(*t),
            _ => None,
        }
    }
}

/// 等待策略上下文
///
/// - 包含了拉取协程当前的运行状态，供策略层决策时参考。
#[derive(Debug, Clone)]
pub struct WaitContext {
    /// 连续空闲次数
    ///
    /// 表示拉取协程已经连续多少次 `acquire` 返回了空。
    /// - 0: 刚刚处理完一个 Key（忙碌状态）。
    /// - >0: 队列处于空闲状态。
    pub idle_count: u32,
    /// [单调时钟] 用于构建 Tokio Timer
    pub now_instant: Instant,
}

impl WaitContext {
    pub fn new(idle_count: u32, now_instant: Instant) -> Self {
        Self {
            idle_count,
            now_instant,
        }
    }
}

/// 等待策略接口 (The Interface)
///
/// - 决定了拉取协程在空闲时该等待多久。
pub trait WaitStrategy: Send + Sync + 'static {
    /// 核心决策方法
    fn make_decision(&self, ctx: &WaitContext) -> WaitDecision;
}
