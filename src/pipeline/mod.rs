//! 查询编排流水线：计划 → 执行 → 合成

pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod reference;
pub mod synthesizer;

pub use events::{EventSink, PipelineEvent, Progress};
pub use executor::{latest_job, PlanExecutor};
pub use orchestrator::{
    Orchestrator, QueryRequest, QueryResponse, TokenUsage, APOLOGY_MESSAGE,
};
pub use plan::{
    ExecutionPlan, PlanStep, Source, SourceRecord, ToolCallRecord, ToolResult,
    DEFAULT_PLAN_UNDERSTANDING,
};
pub use planner::{extract_plan, Planner};
pub use reference::{resolve_params, PathSegment, ReferenceError, StepReference};
pub use synthesizer::{
    is_transcript_analysis, SynthesisResult, Synthesizer, TIMEOUT_MODEL, TIMEOUT_RESPONSE,
    TRANSCRIPT_KEYWORDS,
};
