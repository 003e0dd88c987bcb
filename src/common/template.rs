use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::common::error::{Result, SchedulerError};
use crate::common::time::TimeUtils;
use crate::common::traits::ChaosSpec;

/// 未显式指定时长的持续型故障默认时长
pub const DEFAULT_CHAOS_DURATION: &str = "60s";

// ==========================================
// 1. 目标选择器 (Selector)
// ==========================================

/// 目标选择模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorMode {
    /// 随机选一个
    One,
    /// 全部命中
    All,
    /// 固定数量
    Fixed(u32),
    /// 固定百分比
    FixedPercent(u8),
    /// 随机不超过百分比
    RandomMaxPercent(u8),
}

/// 目标选择器
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// 目标命名空间，为空时取 Schedule 所在命名空间
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    pub mode: SelectorMode,
}

impl Selector {
    fn validate(&self) -> Result<()> {
        match self.mode {
            SelectorMode::Fixed(0) => Err(SchedulerError::InvalidTemplate(
                "selector mode fixed requires at least 1 target".into(),
            )),
            SelectorMode::FixedPercent(p) | SelectorMode::RandomMaxPercent(p) if p > 100 => Err(
                SchedulerError::InvalidTemplate(format!("selector percent {} exceeds 100", p)),
            ),
            _ => Ok(()),
        }
    }

    fn normalize(&mut self, namespace: &str) {
        if self.namespaces.is_empty() {
            self.namespaces.push(namespace.to_string());
        }
    }
}

fn validate_duration(field: &str, value: &Option<String>) -> Result<()> {
    if let Some(raw) = value {
        TimeUtils::parse_duration(raw)
            .map_err(|e| SchedulerError::InvalidTemplate(format!("{}: {}", field, e)))?;
    }
    Ok(())
}

fn validate_percent(field: &str, value: u8) -> Result<()> {
    if value > 100 {
        return Err(SchedulerError::InvalidTemplate(format!(
            "{} must be within 0..=100, got {}",
            field, value
        )));
    }
    Ok(())
}

fn default_duration(value: &mut Option<String>) {
    if value.is_none() {
        *value = Some(DEFAULT_CHAOS_DURATION.to_string());
    }
}

// ==========================================
// 2. PodChaos
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PodAction {
    /// 删除 Pod (瞬时动作，没有持续时长)
    PodKill,
    /// 让 Pod 在一段时间内不可用
    PodFailure,
    /// 杀死指定容器 (瞬时动作)
    ContainerKill,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodChaosSpec {
    pub action: PodAction,
    pub selector: Selector,
    #[serde(default)]
    pub container_names: Vec<String>,
    #[serde(default)]
    pub grace_period: i64,
    #[serde(default)]
    pub duration: Option<String>,
}

impl ChaosSpec for PodChaosSpec {
    const KIND: &'static str = "PodChaos";

    fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        if self.action == PodAction::ContainerKill && self.container_names.is_empty() {
            return Err(SchedulerError::InvalidTemplate(
                "container-kill requires container_names".into(),
            ));
        }
        if self.grace_period < 0 {
            return Err(SchedulerError::InvalidTemplate(
                "grace_period must not be negative".into(),
            ));
        }
        validate_duration("duration", &self.duration)
    }

    fn normalize(&mut self, namespace: &str) {
        self.selector.normalize(namespace);
        match self.action {
            PodAction::PodKill | PodAction::ContainerKill => self.duration = None,
            PodAction::PodFailure => default_duration(&mut self.duration),
        }
    }
}

// ==========================================
// 3. NetworkChaos
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkAction {
    Delay,
    Loss,
    Partition,
    Bandwidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[default]
    To,
    From,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySpec {
    pub latency: String,
    #[serde(default)]
    pub jitter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSpec {
    /// 速率，例如 `1mbps`
    pub rate: String,
    pub limit: u32,
    pub buffer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkChaosSpec {
    pub action: NetworkAction,
    pub selector: Selector,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub delay: Option<DelaySpec>,
    /// 丢包率 (Loss 动作使用)
    #[serde(default)]
    pub loss_percent: Option<u8>,
    #[serde(default)]
    pub bandwidth: Option<BandwidthSpec>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl ChaosSpec for NetworkChaosSpec {
    const KIND: &'static str = "NetworkChaos";

    fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        match self.action {
            NetworkAction::Delay => {
                let delay = self.delay.as_ref().ok_or_else(|| {
                    SchedulerError::InvalidTemplate("delay action requires delay".into())
                })?;
                validate_duration("delay.latency", &Some(delay.latency.clone()))?;
                validate_duration("delay.jitter", &delay.jitter)?;
            }
            NetworkAction::Loss => {
                let loss = self.loss_percent.ok_or_else(|| {
                    SchedulerError::InvalidTemplate("loss action requires loss_percent".into())
                })?;
                validate_percent("loss_percent", loss)?;
            }
            NetworkAction::Bandwidth => {
                let bw = self.bandwidth.as_ref().ok_or_else(|| {
                    SchedulerError::InvalidTemplate("bandwidth action requires bandwidth".into())
                })?;
                if bw.rate.trim().is_empty() || bw.limit == 0 {
                    return Err(SchedulerError::InvalidTemplate(
                        "bandwidth requires a rate and a non-zero limit".into(),
                    ));
                }
            }
            NetworkAction::Partition => {}
        }
        validate_duration("duration", &self.duration)
    }

    fn normalize(&mut self, namespace: &str) {
        self.selector.normalize(namespace);
        default_duration(&mut self.duration);
    }
}

// ==========================================
// 4. StressChaos
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStressor {
    pub workers: u32,
    /// 每个 worker 的负载百分比
    pub load: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStressor {
    pub workers: u32,
    /// 占用大小，例如 `256MB`
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stressors {
    #[serde(default)]
    pub cpu: Option<CpuStressor>,
    #[serde(default)]
    pub memory: Option<MemoryStressor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressChaosSpec {
    pub selector: Selector,
    pub stressors: Stressors,
    #[serde(default)]
    pub duration: Option<String>,
}

impl ChaosSpec for StressChaosSpec {
    const KIND: &'static str = "StressChaos";

    fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        if self.stressors.cpu.is_none() && self.stressors.memory.is_none() {
            return Err(SchedulerError::InvalidTemplate(
                "stress chaos requires at least one stressor".into(),
            ));
        }
        if let Some(cpu) = &self.stressors.cpu {
            if cpu.workers == 0 {
                return Err(SchedulerError::InvalidTemplate(
                    "cpu stressor requires at least 1 worker".into(),
                ));
            }
            validate_percent("cpu.load", cpu.load)?;
        }
        if let Some(mem) = &self.stressors.memory {
            if mem.workers == 0 || mem.size.trim().is_empty() {
                return Err(SchedulerError::InvalidTemplate(
                    "memory stressor requires workers and size".into(),
                ));
            }
        }
        validate_duration("duration", &self.duration)
    }

    fn normalize(&mut self, namespace: &str) {
        self.selector.normalize(namespace);
        default_duration(&mut self.duration);
    }
}

// ==========================================
// 5. IOChaos
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoAction {
    /// 注入 IO 延迟
    Latency,
    /// 注入 IO 错误码
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoChaosSpec {
    pub action: IoAction,
    pub selector: Selector,
    /// 挂载点 (绝对路径)
    pub volume_path: String,
    /// 生效的文件路径通配，默认整个挂载点
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub delay: Option<String>,
    #[serde(default)]
    pub errno: Option<u32>,
    /// 命中概率
    #[serde(default = "default_io_percent")]
    pub percent: u8,
    #[serde(default)]
    pub duration: Option<String>,
}

fn default_io_percent() -> u8 {
    100
}

impl ChaosSpec for IoChaosSpec {
    const KIND: &'static str = "IOChaos";

    fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        if !self.volume_path.starts_with('/') {
            return Err(SchedulerError::InvalidTemplate(format!(
                "volume_path must be absolute, got '{}'",
                self.volume_path
            )));
        }
        match self.action {
            IoAction::Latency if self.delay.is_none() => {
                return Err(SchedulerError::InvalidTemplate(
                    "latency action requires delay".into(),
                ));
            }
            IoAction::Fault if self.errno.is_none() => {
                return Err(SchedulerError::InvalidTemplate(
                    "fault action requires errno".into(),
                ));
            }
            _ => {}
        }
        validate_duration("delay", &self.delay)?;
        validate_percent("percent", self.percent)?;
        validate_duration("duration", &self.duration)
    }

    fn normalize(&mut self, namespace: &str) {
        self.selector.normalize(namespace);
        if self.path.is_none() {
            self.path = Some(format!("{}/**/*", self.volume_path.trim_end_matches('/')));
        }
        default_duration(&mut self.duration);
    }
}

// ==========================================
// 6. TimeChaos
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeChaosSpec {
    pub selector: Selector,
    /// 时钟偏移，例如 `-10m`
    pub time_offset: String,
    #[serde(default)]
    pub clock_ids: Vec<String>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl ChaosSpec for TimeChaosSpec {
    const KIND: &'static str = "TimeChaos";

    fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        TimeUtils::parse_offset(&self.time_offset)
            .map_err(|e| SchedulerError::InvalidTemplate(format!("time_offset: {}", e)))?;
        validate_duration("duration", &self.duration)
    }

    fn normalize(&mut self, namespace: &str) {
        self.selector.normalize(namespace);
        if self.clock_ids.is_empty() {
            self.clock_ids.push("CLOCK_REALTIME".to_string());
        }
        default_duration(&mut self.duration);
    }
}

// ==========================================
// 7. 模板 (封闭联合类型)
// ==========================================

/// 实验模板
///
/// 每次触发时按 Schedule 的命名空间实例化一份，写入实验实例后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec")]
pub enum ExperimentTemplate {
    PodChaos(PodChaosSpec),
    NetworkChaos(NetworkChaosSpec),
    StressChaos(StressChaosSpec),
    #[serde(rename = "IOChaos")]
    IoChaos(IoChaosSpec),
    TimeChaos(TimeChaosSpec),
}

impl ExperimentTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            ExperimentTemplate::PodChaos(_) => PodChaosSpec::KIND,
            ExperimentTemplate::NetworkChaos(_) => NetworkChaosSpec::KIND,
            ExperimentTemplate::StressChaos(_) => StressChaosSpec::KIND,
            ExperimentTemplate::IoChaos(_) => IoChaosSpec::KIND,
            ExperimentTemplate::TimeChaos(_) => TimeChaosSpec::KIND,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ExperimentTemplate::PodChaos(s) => s.validate(),
            ExperimentTemplate::NetworkChaos(s) => s.validate(),
            ExperimentTemplate::StressChaos(s) => s.validate(),
            ExperimentTemplate::IoChaos(s) => s.validate(),
            ExperimentTemplate::TimeChaos(s) => s.validate(),
        }
    }

    pub fn instantiate(&self, namespace: &str) -> ExperimentTemplate {
        match self {
            ExperimentTemplate::PodChaos(s) => Self::PodChaos(s.instantiate(namespace)),
            ExperimentTemplate::NetworkChaos(s) => Self::NetworkChaos(s.instantiate(namespace)),
            ExperimentTemplate::StressChaos(s) => Self::StressChaos(s.instantiate(namespace)),
            ExperimentTemplate::IoChaos(s) => Self::IoChaos(s.instantiate(namespace)),
            ExperimentTemplate::TimeChaos(s) => Self::TimeChaos(s.instantiate(namespace)),
        }
    }

    /// 便捷构造: 在选中的 Pod 中随机删除一个
    pub fn pod_kill(labels: &[(&str, &str)]) -> Self {
        ExperimentTemplate::PodChaos(PodChaosSpec {
            action: PodAction::PodKill,
            selector: Selector {
                namespaces: Vec::new(),
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                mode: SelectorMode::One,
            },
            container_names: Vec::new(),
            grace_period: 0,
            duration: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> Selector {
        Selector {
            namespaces: Vec::new(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            mode: SelectorMode::All,
        }
    }

    #[test]
    fn pod_kill_drops_duration_and_fills_namespace() {
        let tpl = ExperimentTemplate::PodChaos(PodChaosSpec {
            action: PodAction::PodKill,
            selector: selector(),
            container_names: Vec::new(),
            grace_period: 0,
            duration: Some("30s".into()),
        });
        tpl.validate().unwrap();

        let ExperimentTemplate::PodChaos(spec) = tpl.instantiate("chaos") else {
            panic!("kind changed on instantiate");
        };
        assert_eq!(spec.duration, None);
        assert_eq!(spec.selector.namespaces, vec!["chaos".to_string()]);
    }

    #[test]
    fn network_delay_gets_default_duration() {
        let tpl = ExperimentTemplate::NetworkChaos(NetworkChaosSpec {
            action: NetworkAction::Delay,
            selector: selector(),
            direction: Direction::default(),
            delay: Some(DelaySpec {
                latency: "100ms".into(),
                jitter: None,
            }),
            loss_percent: None,
            bandwidth: None,
            duration: None,
        });
        tpl.validate().unwrap();

        let ExperimentTemplate::NetworkChaos(spec) = tpl.instantiate("default") else {
            panic!("kind changed on instantiate");
        };
        assert_eq!(spec.duration.as_deref(), Some(DEFAULT_CHAOS_DURATION));
    }

    #[test]
    fn delay_action_without_delay_is_rejected() {
        let tpl = ExperimentTemplate::NetworkChaos(NetworkChaosSpec {
            action: NetworkAction::Delay,
            selector: selector(),
            direction: Direction::Both,
            delay: None,
            loss_percent: None,
            bandwidth: None,
            duration: None,
        });
        assert!(matches!(
            tpl.validate(),
            Err(SchedulerError::InvalidTemplate(_))
        ));
    }

    #[test]
    fn stress_requires_a_stressor() {
        let tpl = ExperimentTemplate::StressChaos(StressChaosSpec {
            selector: selector(),
            stressors: Stressors::default(),
            duration: None,
        });
        assert!(tpl.validate().is_err());
    }

    #[test]
    fn io_chaos_checks_volume_path() {
        let mut spec = IoChaosSpec {
            action: IoAction::Fault,
            selector: selector(),
            volume_path: "data".into(),
            path: None,
            delay: None,
            errno: Some(5),
            percent: 50,
            duration: None,
        };
        assert!(spec.validate().is_err());

        spec.volume_path = "/var/data/".into();
        spec.validate().unwrap();
        let inst = spec.instantiate("default");
        assert_eq!(inst.path.as_deref(), Some("/var/data/**/*"));
    }

    #[test]
    fn time_chaos_parses_offset() {
        let mut spec = TimeChaosSpec {
            selector: selector(),
            time_offset: "-10m".into(),
            clock_ids: Vec::new(),
            duration: None,
        };
        spec.validate().unwrap();
        spec.time_offset = "yesterday".into();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn template_json_is_tagged_by_kind() {
        let tpl = ExperimentTemplate::pod_kill(&[("app", "web")]);
        let json = serde_json::to_value(&tpl).unwrap();
        assert_eq!(json["kind"], "PodChaos");
        assert_eq!(json["spec"]["action"], "pod-kill");

        let back: ExperimentTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), "PodChaos");
    }
}
