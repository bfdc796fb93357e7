//! 规划 prompt：工具目录 + 输出约定 + 工具选择规则

use schemars::schema_for;

use crate::pipeline::plan::RawPlan;
use crate::prompt::{common_blocks, PromptInputs};
use crate::tools::ToolDescriptor;

/// 规划 prompt 的最后一段
pub const PLANNING_OUTPUT_RULE: &str =
    "Return ONLY a JSON object matching the format above. No prose before or after it.";

const OUTPUT_CONTRACT: &str = r#"## Output format
Respond with an execution plan:
```json
{
  "understanding": "Find the Acme client and list its open tasks",
  "steps": [
    {"tool": "query_clients", "params": {"name": "Acme"}, "reason": "Look up the client id", "confidence": 0.9},
    {"tool": "query_tasks", "params": {"client_id": "$step1.data.clients[0].id", "status": "open"}, "reason": "Open tasks for that client", "confidence": 0.8}
  ],
  "estimated_time": "5 seconds",
  "requires_approval": []
}
```
- Steps run in order. A string param of the form `$step<N>.<path>` is replaced by a field of step N's result
  (1-based, earlier steps only), e.g. `$step1.data.items[0].id`.
- Use an empty `steps` array when no tool is needed.
- List in `requires_approval` every tool that sends, deletes or changes something on the user's behalf."#;

const TOOL_SELECTION_RULES: &str = "\
## Tool selection rules
- If the request mentions a meeting, call or transcript, prefer a transcript search tool over generic database queries.
- Prefer the most specific tool for the record type (client, project, proposal, task) over a generic query tool.
- Look records up before acting on them; never guess ids.
- Only use tools listed in the catalog above.";

/// 计划 JSON 的 schema（schemars 生成），附在输出约定之后
pub fn plan_schema_json() -> String {
    let schema = schema_for!(RawPlan);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn catalog_block(tools: &[ToolDescriptor]) -> String {
    let catalog = serde_json::to_string_pretty(tools).unwrap_or_else(|_| "[]".to_string());
    format!("## Available tools\n```json\n{catalog}\n```")
}

fn request_block(inputs: &PromptInputs<'_>) -> String {
    let mut lines = vec![format!("## Current request\n{}", inputs.user_message.trim())];
    if inputs.history_len > 0 {
        lines.push(format!(
            "The {} earlier messages of this conversation are included; resolve references such as \"that client\" from them.",
            inputs.history_len
        ));
    }
    lines.join("\n")
}

pub fn build_planning_prompt(inputs: &PromptInputs<'_>, tools: &[ToolDescriptor]) -> String {
    let mut blocks = common_blocks(inputs);
    blocks.push(catalog_block(tools));
    blocks.push(OUTPUT_CONTRACT.to_string());
    blocks.push(format!("JSON schema of the plan:\n```json\n{}\n```", plan_schema_json()));
    blocks.push(TOOL_SELECTION_RULES.to_string());
    blocks.push(request_block(inputs));
    blocks.push(PLANNING_OUTPUT_RULE.to_string());
    blocks.join("\n\n")
}
