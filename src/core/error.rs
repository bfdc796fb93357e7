//! 各阶段错误类型
//!
//! 编排链路按阶段划分错误：注册表、工具、LLM、存储、任务队列，最外层由 OrchestratorError 汇总。
//! 可恢复的失败（计划解析失败、单步工具失败、合成超时等）不走这些类型，而是由 StageOutcome 表达。

use thiserror::Error;

/// 工具注册表错误：注册校验、重复注册、参数校验
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid tool: {0}")]
    InvalidTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Missing required parameter '{parameter}' for tool {tool}")]
    MissingParameter { tool: String, parameter: String },
}

/// 单个工具执行失败；由 PlanExecutor 记录为失败的 ToolResult，不会越过执行器边界
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("{0}")]
    Execution(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

/// 模型提供方错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// 外部存储错误；编排器对持久化失败只记日志、不上抛
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),
}

/// 整条查询链路上抛给调用方的错误（除此之外的失败都在阶段内部降级处理）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 规划阶段模型完全不可达：唯一不做 fail-open 的类别
    #[error("Planner error: {0}")]
    Planner(#[source] LlmError),

    /// 合成阶段主备模型均失败
    #[error("Synthesis error: {0}")]
    Synthesis(#[source] LlmError),

    #[error("No model provider configured")]
    NoProvider,

    #[error("Query cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}
