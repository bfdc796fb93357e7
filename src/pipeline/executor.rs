//! PlanExecutor：按顺序执行计划步骤
//!
//! 每一步：progress → 查找工具 → 解析 `$stepN` 引用 → tool_start → 执行 → tool_result / tool_error。
//! 单步失败（找不到工具、缺少参数、工具报错、超时）只记录为失败的 ToolResult，后续步骤照常执行；
//! 只有查询被取消才会中止。

use crate::core::{OrchestratorError, ToolError};
use crate::jobs::JobRef;
use crate::pipeline::reference::resolve_params;
use crate::pipeline::{EventSink, ExecutionPlan, PipelineEvent, PlanStep, Source, ToolCallRecord, ToolResult};
use crate::tools::{ToolContext, ToolExecutor, ToolOutput};

const DEFAULT_SOURCE_TYPE: &str = "unknown";
const DEFAULT_SOURCE_CONFIDENCE: f64 = 0.5;

pub struct PlanExecutor {
    tools: ToolExecutor,
}

impl PlanExecutor {
    pub fn new(tools: ToolExecutor) -> Self {
        Self { tools }
    }

    /// 返回与 plan.steps 同序同数的结果
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        ctx: &ToolContext,
        events: &EventSink,
    ) -> Result<Vec<ToolResult>, OrchestratorError> {
        let total = plan.steps.len();
        let mut results: Vec<ToolResult> = Vec::with_capacity(total);

        for (i, step) in plan.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            events.emit(PipelineEvent::step_progress(i + 1, total, &step.tool));
            let result = self.run_step(i, step, &results, ctx, events).await?;
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        tracing::info!(steps = total, failed, "Plan executed");
        Ok(results)
    }

    async fn run_step(
        &self,
        i: usize,
        step: &PlanStep,
        prior: &[ToolResult],
        ctx: &ToolContext,
        events: &EventSink,
    ) -> Result<ToolResult, OrchestratorError> {
        let step_no = i + 1;
        let registry = self.tools.registry();
        let params = resolve_params(&step.params, i, prior);
        let record = ToolCallRecord {
            tool: step.tool.clone(),
            params: params.clone(),
            reason: step.reason.clone(),
        };

        let Some(tool) = registry.get(&step.tool) else {
            events.emit(PipelineEvent::ToolStart {
                step: step_no,
                tool: step.tool.clone(),
                params,
            });
            let error = format!("Tool not found: {}", step.tool);
            tracing::warn!(step = step_no, tool = %step.tool, "Tool not found");
            return Ok(fail(events, step_no, record, error));
        };

        events.emit(PipelineEvent::ToolStart {
            step: step_no,
            tool: step.tool.clone(),
            params: params.clone(),
        });

        if let Err(e) = registry.validate_params(&step.tool, &params) {
            tracing::warn!(step = step_no, tool = %step.tool, error = %e, "Invalid tool params");
            return Ok(fail(events, step_no, record, e.to_string()));
        }

        match self.tools.execute(tool, params, ctx).await {
            Ok(output) => {
                let result = from_output(step_no, record, output);
                events.emit(PipelineEvent::ToolResult {
                    step: step_no,
                    tool: step.tool.clone(),
                    summary: result.summary(),
                });
                Ok(result)
            }
            Err(ToolError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(e) => {
                tracing::warn!(step = step_no, tool = %step.tool, error = %e, "Tool failed");
                Ok(fail(events, step_no, record, e.to_string()))
            }
        }
    }
}

fn fail(events: &EventSink, step: usize, record: ToolCallRecord, error: String) -> ToolResult {
    events.emit(PipelineEvent::ToolError {
        step,
        tool: record.tool.clone(),
        error: error.clone(),
    });
    ToolResult::failure(step, record, error)
}

/// 工具返回值 → ToolResult；补齐来源默认值（unknown / 0.5 / []）
fn from_output(step: usize, record: ToolCallRecord, output: ToolOutput) -> ToolResult {
    let confidence = output
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_SOURCE_CONFIDENCE);
    let source = Source {
        source_type: output
            .source_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string()),
        confidence,
        data_points: output.data_points.unwrap_or_default(),
    };
    let error = if output.success {
        None
    } else {
        Some(output.error.unwrap_or_else(|| "Tool reported failure".to_string()))
    };
    let job = output.job_id.map(|job_id| JobRef {
        job_id,
        status: output.status,
    });
    ToolResult {
        step,
        tool_call: record,
        data: output.data.filter(|d| !d.is_null()),
        error,
        success: output.success,
        source,
        job,
    }
}

/// 最近一次带 job_id 的结果
pub fn latest_job(results: &[ToolResult]) -> Option<JobRef> {
    results.iter().rev().find_map(|r| r.job.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::jobs::InMemoryJobQueue;
    use crate::store::InMemoryStore;
    use crate::tools::{FnTool, ToolRegistry};

    fn ctx(cancel: CancellationToken) -> ToolContext {
        ToolContext {
            user_id: "1".into(),
            client_id: None,
            project_id: None,
            session_id: Some("s1".into()),
            store: Arc::new(InMemoryStore::new()),
            jobs: Arc::new(InMemoryJobQueue::new()),
            cancel,
        }
    }

    fn executor(registry: ToolRegistry) -> PlanExecutor {
        PlanExecutor::new(ToolExecutor::new(Arc::new(registry), None))
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(FnTool::new("lookup", |_p, _c| async {
                Ok(ToolOutput::ok(json!({"items": [{"id": 42}]}))
                    .with_source("database", 0.9)
                    .with_data_points(vec![json!("client 42")]))
            }))
            .unwrap();
        registry
            .register(FnTool::new("fetch", |p, _c| async move {
                Ok(ToolOutput::ok(json!({"got": p["id"]})))
            }))
            .unwrap();
        registry
            .register(FnTool::new("boom", |_p, _c| async {
                Err(ToolError::execution("backend down"))
            }))
            .unwrap();
        registry
            .register(
                FnTool::new("needs_to", |_p, _c| async { Ok(ToolOutput::ok(json!({}))) })
                    .parameters(json!({"type": "object", "properties": {"to": {"type": "string"}}, "required": ["to"]})),
            )
            .unwrap();
        registry
            .register(FnTool::new("enqueue", |_p, _c| async {
                Ok(ToolOutput::ok(json!({})).with_job("job-1", "queued"))
            }))
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_reference_flows_between_steps() {
        let plan = ExecutionPlan::from_steps(
            "chain",
            vec![
                PlanStep::new("lookup", json!({})),
                PlanStep::new("fetch", json!({"id": "$step1.data.items[0].id"})),
            ],
        );
        let results = executor(registry())
            .execute(&plan, &ctx(CancellationToken::new()), &EventSink::none())
            .await
            .unwrap();
        assert_eq!(results[1].tool_call.params, json!({"id": 42}));
        assert_eq!(results[1].data, Some(json!({"got": 42})));
        assert_eq!(results[0].source.source_type, "database");
        assert_eq!(results[1].source.source_type, "unknown");
        assert_eq!(results[1].source.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_plan() {
        let plan = ExecutionPlan::from_steps(
            "mixed",
            vec![
                PlanStep::new("ghost_tool", json!({})),
                PlanStep::new("boom", json!({})),
                PlanStep::new("needs_to", json!({})),
                PlanStep::new("lookup", json!({})),
            ],
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let results = executor(registry())
            .execute(&plan, &ctx(CancellationToken::new()), &EventSink::new(Some(tx)))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(
            results.iter().map(|r| r.step).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(results[0].error.as_deref(), Some("Tool not found: ghost_tool"));
        assert_eq!(results[1].error.as_deref(), Some("backend down"));
        assert_eq!(results[1].source, Source::error());
        assert!(results[2].error.as_deref().unwrap().contains("to"));
        assert!(results[3].success);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind());
        }
        let per_step_ok = ["progress", "tool_start", "tool_result"];
        let per_step_err = ["progress", "tool_start", "tool_error"];
        assert_eq!(&kinds[0..3], &per_step_err);
        assert_eq!(&kinds[3..6], &per_step_err);
        assert_eq!(&kinds[6..9], &per_step_err);
        assert_eq!(&kinds[9..12], &per_step_ok);
        assert_eq!(kinds.len(), 12);
    }

    #[tokio::test]
    async fn test_job_reference_is_captured() {
        let plan = ExecutionPlan::from_steps(
            "jobs",
            vec![PlanStep::new("enqueue", json!({})), PlanStep::new("lookup", json!({}))],
        );
        let results = executor(registry())
            .execute(&plan, &ctx(CancellationToken::new()), &EventSink::none())
            .await
            .unwrap();
        assert_eq!(
            latest_job(&results),
            Some(JobRef {
                job_id: "job-1".into(),
                status: Some("queued".into())
            })
        );
    }

    #[tokio::test]
    async fn test_cancellation_aborts() {
        let mut registry = registry();
        registry
            .register(FnTool::new("slow", |_p, _c| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ToolOutput::ok(json!({})))
            }))
            .unwrap();
        let plan = ExecutionPlan::from_steps("slow", vec![PlanStep::new("slow", json!({}))]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = executor(registry)
            .execute(&plan, &ctx(cancel), &EventSink::none())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }
}
