//! System prompt 组装（纯函数，无副作用）
//!
//! 固定顺序：领域 / 行为指令 → 当前日期时间 → 个性化（仅当 use_personalization）→ 偏好 →
//! 规划专用的工具目录、输出约定与工具选择规则。规划 prompt 总以「只返回 JSON 对象」结尾。

pub mod planning;
pub mod profile;
pub mod synthesis;

use chrono::Local;

use crate::memory::Preferences;

pub use planning::{build_planning_prompt, plan_schema_json, PLANNING_OUTPUT_RULE};
pub use profile::UserProfile;
pub use synthesis::{build_synthesis_prompt, VERIFICATION_DIRECTIVE};

pub const NO_PREFERENCES: &str = "No learned preferences for this user yet.";

/// 两种 prompt 共用的输入
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub user_message: &'a str,
    pub history_len: usize,
    pub preferences: &'a Preferences,
    pub profile: Option<&'a UserProfile>,
}

const DOMAIN_BLOCK: &str = "\
You are Steward, an operations assistant for a small professional-services agency.
You help the user manage clients, projects, proposals, tasks, onboarding and meeting follow-ups
by calling tools that read and change the agency's records.

Behavior:
- Act on the user's behalf; be direct and specific.
- Ground every claim in tool results. Never invent client names, figures or dates.
- When something cannot be found, say so plainly and suggest the next step.";

fn datetime_block() -> String {
    let now = Local::now();
    format!(
        "## Current date and time\n{} ({})",
        now.format("%A, %B %-d, %Y %H:%M"),
        now.format("%Z")
    )
}

fn preferences_block(preferences: &Preferences) -> String {
    if preferences.is_empty() {
        return format!("## User preferences\n{NO_PREFERENCES}");
    }
    let lines: Vec<String> = preferences
        .values()
        .map(|p| {
            format!(
                "- {}: {} (confidence: {:.2})",
                p.preference_key, p.preference_value, p.confidence_score
            )
        })
        .collect();
    format!("## User preferences\n{}", lines.join("\n"))
}

/// 前四段：领域指令、日期时间、个性化、偏好
fn common_blocks(inputs: &PromptInputs<'_>) -> Vec<String> {
    let mut blocks = vec![DOMAIN_BLOCK.to_string(), datetime_block()];
    if let Some(personal) = inputs.profile.and_then(UserProfile::render) {
        blocks.push(personal);
    }
    blocks.push(preferences_block(inputs.preferences));
    blocks
}
