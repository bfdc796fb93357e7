//! Planner：prompt → 模型调用 → 原始文本 → 结构化计划
//!
//! 主模型已配置则只用主模型（调用失败即规划失败，不做 fail-open）；未配置时用备用模型。
//! 文本提取按 ```json 代码块 → 任意代码块 → 原文 的顺序尝试，全部失败返回默认空计划。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::{Degradation, OrchestratorError, StageOutcome};
use crate::llm::{CompletionRequest, ProviderPair};
use crate::memory::Message;
use crate::pipeline::plan::RawPlan;
use crate::pipeline::ExecutionPlan;
use crate::prompt::{build_planning_prompt, PromptInputs};
use crate::tools::ToolRegistry;

static JSON_FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ANY_FENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn fenced(re: &'static OnceLock<Option<Regex>>, pattern: &str, text: &str) -> Option<String> {
    re.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn parse_raw(candidate: &str) -> Option<RawPlan> {
    match serde_json::from_str::<RawPlan>(candidate) {
        Ok(raw) => Some(raw),
        Err(e) => {
            tracing::debug!(error = %e, "Plan candidate is not valid JSON");
            None
        }
    }
}

/// 从模型文本中提取计划；三种来源都失败时返回 Degraded(默认计划)
pub fn extract_plan(text: &str, tokens_used: u64) -> StageOutcome<ExecutionPlan> {
    let candidates = [
        fenced(&JSON_FENCE_RE, r"(?s)```json\s*(.*?)```", text),
        fenced(&ANY_FENCE_RE, r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```", text),
        Some(text.trim().to_string()),
    ];

    for candidate in candidates.iter().flatten() {
        if let Some(raw) = parse_raw(candidate) {
            return StageOutcome::Complete(raw.into_plan(tokens_used));
        }
    }

    tracing::warn!(
        preview = %text.chars().take(200).collect::<String>(),
        "Failed to parse execution plan, using default plan"
    );
    StageOutcome::degraded(
        ExecutionPlan::default_plan(tokens_used),
        Degradation::PlanParseFailed,
    )
}

pub struct Planner {
    providers: ProviderPair,
    registry: Arc<ToolRegistry>,
    max_tokens: u32,
}

impl Planner {
    pub fn new(providers: ProviderPair, registry: Arc<ToolRegistry>, max_tokens: u32) -> Self {
        Self {
            providers,
            registry,
            max_tokens,
        }
    }

    pub async fn plan(
        &self,
        inputs: &PromptInputs<'_>,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<ExecutionPlan>, OrchestratorError> {
        let llm = self
            .providers
            .preferred()
            .ok_or(OrchestratorError::NoProvider)?;

        let system = build_planning_prompt(inputs, &self.registry.describe());
        let mut messages = history.to_vec();
        messages.push(Message::user(inputs.user_message));
        let request = CompletionRequest::new(system, messages).with_max_tokens(self.max_tokens);

        tracing::info!(model = llm.model(), history = history.len(), "Planning");
        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            r = llm.complete(&request) => r.map_err(OrchestratorError::Planner)?,
        };

        let outcome = extract_plan(&completion.content, completion.tokens_used())
            .map(|plan| self.annotate_approvals(plan));
        let plan = outcome.value();
        tracing::info!(
            steps = plan.steps.len(),
            tokens = plan.tokens_used,
            degraded = outcome.is_degraded(),
            "Plan ready"
        );
        Ok(outcome)
    }

    /// 模型声明的 requires_approval ∪ 计划中出现的、注册表标记需审批的工具（仅标注，不阻断执行）
    fn annotate_approvals(&self, mut plan: ExecutionPlan) -> ExecutionPlan {
        for step in &plan.steps {
            let flagged = self
                .registry
                .get(&step.tool)
                .map(|t| t.requires_approval)
                .unwrap_or(false);
            if flagged && !plan.requires_approval.contains(&step.tool) {
                plan.requires_approval.push(step.tool.clone());
            }
        }
        plan
    }
}
