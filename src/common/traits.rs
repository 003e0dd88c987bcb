use crate::common::error::Result;

// ==========================================
// 实验载荷接口 (ChaosSpec)
// ==========================================

/// 单一故障类型的载荷
///
/// 每个模板变体 (PodChaos、NetworkChaos ...) 自己负责校验与实例化时的默认值填充，
/// `ExperimentTemplate` 只做分发。
pub trait ChaosSpec: Clone + Send + Sync + 'static {
    /// 类型名 (事件与日志中使用)
    const KIND: &'static str;

    /// 校验载荷
    ///
    /// 失败时返回 `SchedulerError::InvalidTemplate`。
    fn validate(&self) -> Result<()>;

    /// 实例化时的规范化
    ///
    /// - `namespace`: 所属 Schedule 的命名空间，选择器未指定命名空间时以它兜底。
    fn normalize(&mut self, namespace: &str);

    /// 克隆并规范化，得到写入实验实例的载荷
    fn instantiate(&self, namespace: &str) -> Self {
        let mut copy = self.clone();
        copy.normalize(namespace);
        copy
    }
}
