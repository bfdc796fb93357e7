//! 由配置装配编排器
//!
//! build_orchestrator 按 AppConfig 创建主备模型、SQLite 存储与工具注册表；
//! build_orchestrator_with 接收已构建的依赖，测试与嵌入方可替换其中任意一项。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::OrchestratorError;
use crate::jobs::{InMemoryJobQueue, JobQueue};
use crate::llm::{create_providers, ProviderPair};
use crate::memory::PreferenceGateway;
use crate::pipeline::{Orchestrator, PlanExecutor, Planner, Synthesizer};
use crate::store::{SqliteStore, Store};
use crate::tools::{ToolExecutor, ToolManifest, ToolRegistry};

/// 编排器的外部依赖
pub struct Dependencies {
    pub registry: ToolRegistry,
    pub providers: ProviderPair,
    pub store: Arc<dyn Store>,
    pub jobs: Arc<dyn JobQueue>,
}

pub fn build_orchestrator_with(cfg: &AppConfig, deps: Dependencies) -> Orchestrator {
    let registry = Arc::new(deps.registry);
    let planner = Planner::new(deps.providers.clone(), Arc::clone(&registry), cfg.llm.max_tokens);
    let executor = PlanExecutor::new(ToolExecutor::new(registry, cfg.tools.timeout()));
    let synthesizer = Synthesizer::new(
        deps.providers,
        cfg.llm.synthesis_timeout(),
        cfg.llm.max_tokens,
    )
    .with_transcript_fallback_flag(cfg.llm.use_fallback_for_transcripts);
    let memory = Arc::new(PreferenceGateway::new(
        Arc::clone(&deps.store),
        cfg.memory.clone(),
    ));

    Orchestrator::new(
        planner,
        executor,
        synthesizer,
        memory,
        deps.store,
        deps.jobs,
        cfg.app.history_limit(),
    )
}

/// 从配置装配：工具清单 → 注册表，主备模型，SQLite 存储，进程内任务队列
pub async fn build_orchestrator(
    cfg: &AppConfig,
    manifest: &ToolManifest,
) -> Result<Orchestrator, OrchestratorError> {
    let providers = create_providers(&cfg.llm);
    if providers.is_empty() {
        return Err(OrchestratorError::NoProvider);
    }

    let (registry, skipped) = manifest.load(cfg);
    for s in &skipped {
        tracing::warn!(tool = %s.name, reason = %s.reason, "Tool unavailable");
    }

    let store = SqliteStore::connect(&cfg.store.database_url, cfg.store.max_connections)
        .await
        .map_err(|e| OrchestratorError::Config(format!("store: {e}")))?;
    tracing::info!(url = %cfg.store.database_url, tools = registry.len(), "Orchestrator ready");

    Ok(build_orchestrator_with(
        cfg,
        Dependencies {
            registry,
            providers,
            store: Arc::new(store),
            jobs: Arc::new(InMemoryJobQueue::new()),
        },
    ))
}
