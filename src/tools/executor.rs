//! 工具执行器
//!
//! 对单次工具调用施加可选超时与查询级取消，并输出结构化审计日志（JSON）。
//! 计划层面的逐步执行、引用解析与事件推送见 pipeline::executor。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::ToolError;
use crate::tools::{RegisteredTool, ToolContext, ToolOutput, ToolRegistry};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Option<Duration>) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行工具；超时返回 Timeout，取消返回 Cancelled；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool: &RegisteredTool,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&params);

        let call = tool.tool.execute(params, ctx);
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            r = async {
                match self.timeout {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .unwrap_or_else(|_| Err(ToolError::Timeout(tool.name.clone()))),
                    None => call.await,
                }
            } => r,
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(out) if out.success => (true, "ok"),
            Ok(_) => (false, "reported_failure"),
            Err(ToolError::Timeout(_)) => (false, "timeout"),
            Err(ToolError::Cancelled) => (false, "cancelled"),
            Err(_) => (false, "error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        result
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
