//! 合成 prompt：执行结果转储 + 格式指令；转写分析类查询追加复核指令

use crate::pipeline::ToolResult;
use crate::prompt::{common_blocks, PromptInputs};

const FORMAT_RULES: &str = "\
## Response rules
- Answer the user's request directly using the tool results above.
- Never include tool-call markup, JSON plans or step numbers in the answer.
- Write confident, natural prose without disclaimers about being an AI or about tools.
- If a step failed, mention only what the user needs to know and what they can do next.
- End with a `Sources:` section, one line per source used, formatted as
  `[type: description] (Confidence: x.xx)`.";

pub const VERIFICATION_DIRECTIVE: &str = "\
## Verification
Before finalizing, re-read every transcript excerpt and check for commitments, action items,
deadlines and follow-ups you have not yet listed. Add any you missed, with who owns them.";

/// 单步数据写入 prompt 的字符上限
pub const MAX_RESULT_DATA_CHARS: usize = 4000;

fn data_preview(data: &serde_json::Value) -> String {
    let body = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
    let total = body.chars().count();
    if total > MAX_RESULT_DATA_CHARS {
        format!(
            "{}\n... (truncated, {} more characters)",
            body.chars().take(MAX_RESULT_DATA_CHARS).collect::<String>(),
            total - MAX_RESULT_DATA_CHARS
        )
    } else {
        body
    }
}

fn results_block(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return "## Tool results\nNo tools were run for this request.".to_string();
    }
    let mut out = String::from("## Tool results");
    for r in results {
        let status = if r.success { "success" } else { "failed" };
        out.push_str(&format!(
            "\n\n### Step {}: {} ({status})",
            r.step, r.tool_call.tool
        ));
        if !r.tool_call.reason.is_empty() {
            out.push_str(&format!("\nPurpose: {}", r.tool_call.reason));
        }
        match (&r.data, &r.error) {
            (_, Some(err)) if !r.success => out.push_str(&format!("\nError: {err}")),
            (Some(data), _) => out.push_str(&format!("\nData:\n{}", data_preview(data))),
            _ => out.push_str("\nData: (none)"),
        }
        out.push_str(&format!(
            "\nSource: {} (confidence: {:.2})",
            r.source.source_type, r.source.confidence
        ));
    }
    out
}

pub fn build_synthesis_prompt(
    inputs: &PromptInputs<'_>,
    results: &[ToolResult],
    transcript_analysis: bool,
) -> String {
    let mut blocks = common_blocks(inputs);
    blocks.push(format!("## User request\n{}", inputs.user_message.trim()));
    blocks.push(results_block(results));
    blocks.push(FORMAT_RULES.to_string());
    if transcript_analysis {
        blocks.push(VERIFICATION_DIRECTIVE.to_string());
    }
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Preferences;
    use crate::pipeline::{Source, ToolCallRecord};
    use serde_json::json;

    fn inputs(prefs: &Preferences) -> PromptInputs<'_> {
        PromptInputs {
            user_message: "List open tasks",
            history_len: 0,
            preferences: prefs,
            profile: None,
        }
    }

    #[test]
    fn test_results_dump_includes_data_and_errors() {
        let prefs = Preferences::new();
        let ok = ToolResult {
            step: 1,
            tool_call: ToolCallRecord {
                tool: "query_tasks".into(),
                params: json!({}),
                reason: "find tasks".into(),
            },
            data: Some(json!({"tasks": ["Send invoice"]})),
            error: None,
            success: true,
            source: Source {
                source_type: "database".into(),
                confidence: 0.9,
                data_points: vec![],
            },
            job: None,
        };
        let failed = ToolResult::failure(
            2,
            ToolCallRecord {
                tool: "ghost_tool".into(),
                params: json!({}),
                reason: String::new(),
            },
            "Tool not found: ghost_tool",
        );
        let prompt = build_synthesis_prompt(&inputs(&prefs), &[ok, failed], false);
        assert!(prompt.contains("### Step 1: query_tasks (success)"));
        assert!(prompt.contains("Send invoice"));
        assert!(prompt.contains("Source: database (confidence: 0.90)"));
        assert!(prompt.contains("Error: Tool not found: ghost_tool"));
        assert!(prompt.contains("Sources:"));
        assert!(!prompt.contains(VERIFICATION_DIRECTIVE));
    }

    #[test]
    fn test_large_data_is_truncated() {
        let prefs = Preferences::new();
        let rows: Vec<String> = (0..2000).map(|i| format!("row-{i}")).collect();
        let result = ToolResult {
            step: 1,
            tool_call: ToolCallRecord {
                tool: "query_tasks".into(),
                params: json!({}),
                reason: String::new(),
            },
            data: Some(json!({"rows": rows})),
            error: None,
            success: true,
            source: Source {
                source_type: "database".into(),
                confidence: 0.9,
                data_points: vec![],
            },
            job: None,
        };
        let prompt = build_synthesis_prompt(&inputs(&prefs), &[result], false);
        assert!(prompt.contains("row-0"));
        assert!(!prompt.contains("row-1999"));
        assert!(prompt.contains("... (truncated,"));
        assert!(prompt.contains("Source: database (confidence: 0.90)"));
    }

    #[test]
    fn test_verification_directive_gated() {
        let prefs = Preferences::new();
        let prompt = build_synthesis_prompt(&inputs(&prefs), &[], true);
        assert!(prompt.ends_with(VERIFICATION_DIRECTIVE));
        assert!(prompt.contains("No tools were run"));
    }
}
