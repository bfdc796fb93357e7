//! Echo 工具：回显文本，用于联调与演示

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::{Tool, ToolContext, ToolOutput};

#[allow(dead_code)]
#[derive(Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    text: String,
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back unchanged (for testing the pipeline). Params: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(EchoArgs)).unwrap_or_else(|_| json!({}))
    }

    fn category(&self) -> &str {
        "utility"
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let text = match params.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(ToolError::execution("missing 'text'")),
        };
        Ok(ToolOutput::ok(json!({ "text": text }))
            .with_source("echo", 1.0)
            .with_data_points(vec![json!(text)]))
    }
}
