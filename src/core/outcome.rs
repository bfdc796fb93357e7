//! 阶段产出：完整结果或「已恢复但降级」的结果
//!
//! 规划、合成等 fail-open 阶段统一返回 StageOutcome，调用方无需从空字段推断是否发生了降级。

use serde::Serialize;

/// 降级原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// 模型输出无法解析为计划，使用默认空计划
    PlanParseFailed,
    /// 主模型失败，已由备用模型完成
    FallbackProvider,
    /// 合成超过时限，返回固定降级文本
    SynthesisTimeout,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanParseFailed => "plan_parse_failed",
            Self::FallbackProvider => "fallback_provider",
            Self::SynthesisTimeout => "synthesis_timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Complete(T),
    Degraded { value: T, reason: Degradation },
}

impl<T> StageOutcome<T> {
    pub fn degraded(value: T, reason: Degradation) -> Self {
        Self::Degraded { value, reason }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Complete(v) | Self::Degraded { value: v, .. } => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Complete(v) | Self::Degraded { value: v, .. } => v,
        }
    }

    pub fn degradation(&self) -> Option<&Degradation> {
        match self {
            Self::Complete(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degradation().is_some()
    }

    /// 变换值，保留降级原因
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageOutcome<U> {
        match self {
            Self::Complete(v) => StageOutcome::Complete(f(v)),
            Self::Degraded { value, reason } => StageOutcome::Degraded {
                value: f(value),
                reason,
            },
        }
    }

    /// 拆为值与降级原因
    pub fn into_parts(self) -> (T, Option<Degradation>) {
        match self {
            Self::Complete(v) => (v, None),
            Self::Degraded { value, reason } => (value, Some(reason)),
        }
    }
}
