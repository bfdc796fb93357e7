//! 编排器：一次查询的完整链路
//!
//! 加载历史 / 偏好 / 资料 → 规划 → 推送计划 → 逐步执行 → 合成 → 持久化两条消息 → 后台强化偏好 → 返回结果。
//! 任一阶段抛出错误时，持久化用户消息与固定致歉回复后把原错误返回给调用方。

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{OrchestratorError, StoreError};
use crate::jobs::{JobQueue, JobRef};
use crate::memory::{Message, PreferenceGateway, Role};
use crate::pipeline::executor::latest_job;
use crate::pipeline::{
    EventSink, ExecutionPlan, PipelineEvent, PlanExecutor, Planner, SourceRecord, SynthesisResult,
    Synthesizer, ToolResult,
};
use crate::prompt::{PromptInputs, UserProfile};
use crate::store::{MessageRecord, Store};
use crate::tools::ToolContext;

pub const APOLOGY_MESSAGE: &str =
    "I'm sorry, something went wrong while processing your request. Please try again.";

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub message: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub planning: u64,
    pub synthesis: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.planning + self.synthesis
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub content: String,
    pub plan: ExecutionPlan,
    pub tool_results: Vec<ToolResult>,
    pub sources: Vec<SourceRecord>,
    pub tokens: TokenUsage,
    pub model: String,
    pub job: Option<JobRef>,
    /// 本次查询发生的降级（plan_parse_failed / fallback_provider / synthesis_timeout）
    pub degraded: Vec<String>,
}

pub struct Orchestrator {
    planner: Planner,
    executor: PlanExecutor,
    synthesizer: Synthesizer,
    memory: Arc<PreferenceGateway>,
    store: Arc<dyn Store>,
    jobs: Arc<dyn JobQueue>,
    history_limit: usize,
    memory_tasks: Mutex<Vec<JoinHandle<usize>>>,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        executor: PlanExecutor,
        synthesizer: Synthesizer,
        memory: Arc<PreferenceGateway>,
        store: Arc<dyn Store>,
        jobs: Arc<dyn JobQueue>,
        history_limit: usize,
    ) -> Self {
        Self {
            planner,
            executor,
            synthesizer,
            memory,
            store,
            jobs,
            history_limit,
            memory_tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn process_query(
        &self,
        request: QueryRequest,
        events: Option<UnboundedSender<PipelineEvent>>,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, OrchestratorError> {
        let sink = EventSink::new(events);
        tracing::info!(
            user_id = %request.user_id,
            session_id = request.session_id.as_deref().unwrap_or("-"),
            streaming = sink.is_streaming(),
            "Processing query"
        );

        match self.run(&request, &sink, &cancel).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::error!(error = %e, "Query failed, persisting apology");
                let session = request.session_id.as_deref();
                self.persist(MessageRecord::new(session, Role::User, &request.message))
                    .await;
                self.persist(MessageRecord::new(session, Role::Assistant, APOLOGY_MESSAGE))
                    .await;
                Err(e)
            }
        }
    }

    /// 等待所有后台偏好更新完成
    pub async fn flush_memory(&self) {
        let handles: Vec<JoinHandle<usize>> = match self.memory_tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Memory update task failed");
            }
        }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse, OrchestratorError> {
        let session = request.session_id.as_deref();
        let history = self.load_history(session).await;
        let preferences = self.memory.get_preferences(&request.user_id).await;
        let profile = self.load_profile(&request.user_id).await;
        let inputs = PromptInputs {
            user_message: &request.message,
            history_len: history.len(),
            preferences: &preferences,
            profile: profile.as_ref(),
        };

        let mut degraded = Vec::new();

        let (plan, plan_degradation) = self
            .planner
            .plan(&inputs, &history, cancel)
            .await?
            .into_parts();
        degraded.extend(plan_degradation.map(|d| d.as_str().to_string()));
        events.emit(PipelineEvent::Plan(plan.clone()));

        let ctx = ToolContext {
            user_id: request.user_id.clone(),
            client_id: request.client_id.clone(),
            project_id: request.project_id.clone(),
            session_id: request.session_id.clone(),
            store: Arc::clone(&self.store),
            jobs: Arc::clone(&self.jobs),
            cancel: cancel.clone(),
        };
        let results = self.executor.execute(&plan, &ctx, events).await?;

        let (synthesis, synthesis_degradation) = self
            .synthesizer
            .synthesize(&inputs, &history, &results, events, cancel)
            .await?
            .into_parts();
        degraded.extend(synthesis_degradation.map(|d| d.as_str().to_string()));

        let tokens = TokenUsage {
            planning: plan.tokens_used,
            synthesis: synthesis.tokens_used,
        };
        let sources: Vec<SourceRecord> = results.iter().map(ToolResult::source_record).collect();
        let job = latest_job(&results);

        self.persist(MessageRecord::new(session, Role::User, &request.message))
            .await;
        let assistant =
            assistant_record(session, &synthesis, tokens, &plan, &results, &sources, job.as_ref());
        self.persist(assistant).await;

        self.spawn_memory_update(&request.user_id, &results);

        Ok(QueryResponse {
            content: synthesis.content,
            plan,
            tool_results: results,
            sources,
            tokens,
            model: synthesis.model,
            job,
            degraded,
        })
    }

    async fn load_history(&self, session: Option<&str>) -> Vec<Message> {
        let Some(session_id) = session else {
            return Vec::new();
        };
        match self.store.load_history(session_id, self.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Failed to load history, continuing without");
                Vec::new()
            }
        }
    }

    async fn load_profile(&self, user_id: &str) -> Option<UserProfile> {
        match self.store.load_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load user profile");
                None
            }
        }
    }

    /// 写入失败只记日志，不重试、不影响返回
    async fn persist(&self, record: MessageRecord) {
        if let Err(e) = self.store.save_message(&record).await {
            log_persist_error(&record, &e);
        }
    }

    fn spawn_memory_update(&self, user_id: &str, results: &[ToolResult]) {
        let handle = self.memory.spawn_update(user_id.to_string(), results.to_vec());
        if let Ok(mut tasks) = self.memory_tasks.lock() {
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }
    }
}

fn assistant_record(
    session: Option<&str>,
    synthesis: &SynthesisResult,
    tokens: TokenUsage,
    plan: &ExecutionPlan,
    results: &[ToolResult],
    sources: &[SourceRecord],
    job: Option<&JobRef>,
) -> MessageRecord {
    let tool_calls: Vec<_> = results.iter().map(|r| &r.tool_call).collect();
    let mut record = MessageRecord::new(session, Role::Assistant, synthesis.content.as_str());
    record.model_used = Some(synthesis.model.clone());
    record.tokens_used = tokens.total();
    record.plan_json = to_json_text(plan);
    record.tool_calls = to_json_text(&tool_calls);
    record.sources = to_json_text(sources);
    record.job_id = job.map(|j| j.job_id.clone());
    record.job_status = job.and_then(|j| j.status.clone());
    record
}

fn to_json_text<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize message field");
            None
        }
    }
}

fn log_persist_error(record: &MessageRecord, e: &StoreError) {
    tracing::warn!(
        session_id = record.session_id.as_deref().unwrap_or("-"),
        role = record.role.as_str(),
        error = %e,
        "Failed to persist message"
    );
}
