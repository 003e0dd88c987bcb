use nanoid::nanoid;
use rand::Rng;
use std::time::Duration;

// ==========================================
// 1. ID 生成工具 (Identity Utilities)
// ==========================================

/// 生成对象的 UID (NanoID)
///
/// - 长度: 21 字符
/// - 字符集: 0-9a-zA-Z (不含 - 和 _，方便双击选中)
#[inline]
pub fn new_uid() -> String {
    const ALPHABET: [char; 62] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
        'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
        'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
        'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
    ];
    nanoid!(21, &ALPHABET)
}

/// 获取当前机器的主机名
///
/// 用于生成默认的 `node_id`。
pub fn get_hostname() -> String {
    hostname::get()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| format!("node_{}", nanoid!(5)))
}

// ==========================================
// 2. 算法工具 (Algorithmic Utilities)
// ==========================================

/// 计算指数退避时间 (Exponential Backoff with Jitter)
///
/// - attempt: 当前重试次数 (1, 2, 3...)
/// - base_delay: 基础延迟秒数
/// - max_delay: 最大延迟秒数
///
/// 返回值落在 `[base_delay, min(base * 2^(attempt-1), max_delay)]` 之间。
pub fn calculate_backoff(attempt: u32, base_delay: f64, max_delay: f64) -> Duration {
    let mut rng = rand::rng();

    // 1. 计算指数部分: base * 2^(attempt-1)
    let exponent = 2u32.saturating_pow(attempt.saturating_sub(1).min(30));
    let backoff = (base_delay * (exponent as f64)).min(max_delay);

    // 2. 添加抖动 (Equal Jitter 的下界改为 base，保证冲突后不会立刻原地打转)
    let jittered = if backoff > base_delay {
        rng.random_range(base_delay..=backoff)
    } else {
        backoff
    };

    Duration::from_secs_f64(jittered.max(0.0))
}
