use crate::common::Schedule;

/// 暂停闸门
///
/// 打开 (暂停) 时 Reconciler 跳过触发计算，但历史清理照常执行，活跃实例不受影响。
/// 恢复后遗漏的触发点按正常的追赶规则合并。
pub struct PauseGate;

impl PauseGate {
    pub fn is_paused(schedule: &Schedule) -> bool {
        schedule.spec.suspend
    }
}
