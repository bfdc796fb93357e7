//! 执行计划与工具结果
//!
//! ExecutionPlan 每次查询生成一次、之后不再修改；ToolResult 每个执行步骤一条，按步骤顺序排列。

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::jobs::JobRef;

/// 计划中的单个步骤；params 中形如 `$step<N>.<path>` 的字符串在执行时替换为前序步骤的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub params: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
    /// [0, 1]
    #[serde(default = "default_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_confidence() -> f64 {
    0.5
}

/// 字符串或数字；null 与其他类型视为缺省
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(lenient_text(d)?.unwrap_or_default())
}

/// 数字或数字字符串，否则取默认置信度
fn lenient_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let parsed = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(default_confidence))
}

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            reason: String::new(),
            confidence: default_confidence(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// 执行计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub understanding: String,
    pub steps: Vec<PlanStep>,
    pub estimated_time: String,
    pub requires_approval: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub tokens_used: u64,
}

pub const DEFAULT_PLAN_UNDERSTANDING: &str = "Failed to parse execution plan";

impl ExecutionPlan {
    /// 计划解析失败时的默认计划：不调用任何工具，直接进入合成
    pub fn default_plan(tokens_used: u64) -> Self {
        Self {
            understanding: DEFAULT_PLAN_UNDERSTANDING.to_string(),
            steps: Vec::new(),
            estimated_time: "unknown".to_string(),
            requires_approval: Vec::new(),
            created_at: Utc::now(),
            tokens_used,
        }
    }

    pub fn from_steps(understanding: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            understanding: understanding.into(),
            steps,
            estimated_time: "unknown".to_string(),
            requires_approval: Vec::new(),
            created_at: Utc::now(),
            tokens_used: 0,
        }
    }
}

/// 模型输出的计划 JSON（字段宽松：缺省或 null 即默认值，数字与字符串互通，兼容 camelCase）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub(crate) struct RawPlan {
    #[serde(default, deserialize_with = "lenient_string")]
    pub understanding: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub steps: Vec<PlanStep>,
    #[serde(default, alias = "estimatedTime", deserialize_with = "lenient_text")]
    pub estimated_time: Option<String>,
    #[serde(default, alias = "requiresApproval", deserialize_with = "null_as_empty")]
    pub requires_approval: Vec<String>,
}

impl RawPlan {
    pub fn into_plan(self, tokens_used: u64) -> ExecutionPlan {
        let steps = self
            .steps
            .into_iter()
            .map(|mut s| {
                s.confidence = if s.confidence.is_finite() {
                    s.confidence.clamp(0.0, 1.0)
                } else {
                    default_confidence()
                };
                if s.params.is_null() {
                    s.params = empty_object();
                }
                s
            })
            .collect();
        ExecutionPlan {
            understanding: self.understanding,
            steps,
            estimated_time: self
                .estimated_time
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            requires_approval: self.requires_approval,
            created_at: Utc::now(),
            tokens_used,
        }
    }
}

/// 工具调用快照（执行前的 tool / 解析后的 params / reason）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub params: Value,
    pub reason: String,
}

/// 数据来源：供合成阶段引用与置信度标注
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub data_points: Vec<Value>,
}

impl Source {
    pub fn error() -> Self {
        Self {
            source_type: "error".to_string(),
            confidence: 0.0,
            data_points: Vec::new(),
        }
    }
}

/// 单步执行结果；失败也会记录，不会抛出执行器边界
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// 1 起始的步骤号
    pub step: usize,
    #[serde(rename = "toolCall")]
    pub tool_call: ToolCallRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobRef>,
}

impl ToolResult {
    pub fn failure(step: usize, tool_call: ToolCallRecord, error: impl Into<String>) -> Self {
        Self {
            step,
            tool_call,
            data: None,
            error: Some(error.into()),
            success: false,
            source: Source::error(),
            job: None,
        }
    }

    /// 单行摘要：失败原因，或数据点数量
    pub fn summary(&self) -> String {
        if self.success {
            format!("Found {} data points", self.source.data_points.len())
        } else {
            format!(
                "Failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }

    pub fn source_record(&self) -> SourceRecord {
        SourceRecord {
            tool: self.tool_call.tool.clone(),
            source_type: self.source.source_type.clone(),
            confidence: self.source.confidence,
            data_points: self.source.data_points.clone(),
        }
    }
}

/// 返回给调用方 / 持久化的来源条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub tool: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub confidence: f64,
    pub data_points: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_plan_defaults_and_clamping() {
        let raw: RawPlan = serde_json::from_value(json!({
            "understanding": "find client",
            "steps": [
                {"tool": "query_clients", "confidence": 3.0},
                {"tool": "send_email", "params": {"to": "a@b.c"}, "reason": "notify"}
            ],
            "estimatedTime": "5 seconds",
            "requiresApproval": ["send_email"]
        }))
        .unwrap();
        let plan = raw.into_plan(12);
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].confidence, 1.0);
        assert_eq!(plan.steps[0].params, json!({}));
        assert_eq!(plan.steps[1].confidence, 0.5);
        assert_eq!(plan.estimated_time, "5 seconds");
        assert_eq!(plan.requires_approval, vec!["send_email"]);
        assert_eq!(plan.tokens_used, 12);
    }

    #[test]
    fn test_raw_plan_accepts_loose_field_types() {
        let raw: RawPlan = serde_json::from_value(json!({
            "steps": [{"tool": "query_clients", "params": {}, "confidence": "0.8", "reason": null}],
            "estimated_time": 5,
            "requires_approval": null
        }))
        .unwrap();
        let plan = raw.into_plan(0);
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].confidence, 0.8);
        assert_eq!(plan.steps[0].reason, "");
        assert_eq!(plan.estimated_time, "5");
        assert!(plan.requires_approval.is_empty());

        let raw: RawPlan = serde_json::from_value(json!({
            "understanding": null,
            "steps": null,
            "estimatedTime": null
        }))
        .unwrap();
        let plan = raw.into_plan(0);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.estimated_time, "unknown");

        let step: PlanStep =
            serde_json::from_value(json!({"tool": "x", "confidence": "high"})).unwrap();
        assert_eq!(step.confidence, 0.5);
    }

    #[test]
    fn test_default_plan_shape() {
        let plan = ExecutionPlan::default_plan(0);
        assert_eq!(plan.understanding, DEFAULT_PLAN_UNDERSTANDING);
        assert!(plan.steps.is_empty());
        assert!(plan.requires_approval.is_empty());
        assert_eq!(plan.estimated_time, "unknown");
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let result = ToolResult::failure(
            2,
            ToolCallRecord {
                tool: "ghost_tool".into(),
                params: json!({}),
                reason: "".into(),
            },
            "Tool not found: ghost_tool",
        );
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["toolCall"]["tool"], "ghost_tool");
        assert_eq!(v["source"]["type"], "error");
        assert_eq!(v["success"], false);
        assert!(v.get("data").is_none());
        assert_eq!(result.summary(), "Failed: Tool not found: ghost_tool");
    }
}
