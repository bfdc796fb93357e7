//! 流式事件：`{type, data}`，每个查询单写者、严格按发出顺序送达
//!
//! 顺序：plan → (progress, tool_start, tool_result | tool_error)* → progress("Analyzing results...")
//! → [progress(verification)] → progress("Generating response...") → response_chunk*

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::pipeline::ExecutionPlan;

pub const ANALYZING_RESULTS: &str = "Analyzing results...";
pub const VERIFYING: &str = "Verifying commitments and action items...";
pub const GENERATING_RESPONSE: &str = "Generating response...";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Progress {
    /// 第 step 步（1 起始）开始执行
    Step {
        step: usize,
        total: usize,
        tool: String,
        status: String,
    },
    Stage { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    Plan(ExecutionPlan),
    Progress(Progress),
    ToolStart {
        step: usize,
        tool: String,
        params: Value,
    },
    ToolResult {
        step: usize,
        tool: String,
        summary: String,
    },
    ToolError {
        step: usize,
        tool: String,
        error: String,
    },
    ResponseChunk { text: String },
}

impl PipelineEvent {
    pub fn step_progress(step: usize, total: usize, tool: &str) -> Self {
        Self::Progress(Progress::Step {
            step,
            total,
            tool: tool.to_string(),
            status: "executing".to_string(),
        })
    }

    pub fn stage(message: &str) -> Self {
        Self::Progress(Progress::Stage {
            message: message.to_string(),
        })
    }

    /// 与线上 `type` 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Plan(_) => "plan",
            Self::Progress(_) => "progress",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::ResponseChunk { .. } => "response_chunk",
        }
    }
}

/// 调用方提供的事件通道；未提供时所有 emit 为 no-op
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<PipelineEvent>>) -> Self {
        Self { tx }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.tx.is_some()
    }

    /// 接收方已关闭时丢弃事件，查询继续
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("Event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let v = serde_json::to_value(PipelineEvent::step_progress(1, 3, "query_clients")).unwrap();
        assert_eq!(
            v,
            json!({"type": "progress", "data": {"step": 1, "total": 3, "tool": "query_clients", "status": "executing"}})
        );

        let v = serde_json::to_value(PipelineEvent::stage(ANALYZING_RESULTS)).unwrap();
        assert_eq!(v, json!({"type": "progress", "data": {"message": "Analyzing results..."}}));

        let v = serde_json::to_value(PipelineEvent::ResponseChunk { text: "Hi".into() }).unwrap();
        assert_eq!(v, json!({"type": "response_chunk", "data": {"text": "Hi"}}));
    }

    #[tokio::test]
    async fn test_sink_preserves_order_and_survives_dropped_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(Some(tx));
        sink.emit(PipelineEvent::stage("a"));
        sink.emit(PipelineEvent::stage("b"));
        assert_eq!(rx.recv().await, Some(PipelineEvent::stage("a")));
        assert_eq!(rx.recv().await, Some(PipelineEvent::stage("b")));
        drop(rx);
        sink.emit(PipelineEvent::stage("c"));
        EventSink::none().emit(PipelineEvent::stage("d"));
    }
}
