//! Steward - 智能体查询编排
//!
//! 把一条自然语言请求变成多步工具调用计划，按序执行（步骤间可引用前序结果），再合成带来源标注的回答；
//! 过程中流式推送事件，容忍单步失败，并在主备模型之间回退、对合成阶段施加硬时限。
//!
//! 模块划分：
//! - **agent**: 由配置装配 Orchestrator
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 阶段错误类型与 StageOutcome
//! - **jobs**: 后台任务队列句柄
//! - **llm**: LLM 客户端抽象与实现（Anthropic / OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话消息与用户长期偏好
//! - **observability**: tracing 初始化
//! - **pipeline**: Planner、PlanExecutor、Synthesizer、事件与 Orchestrator
//! - **prompt**: 规划 / 合成 system prompt 组装
//! - **store**: 会话、消息、偏好与用户资料存储（内存 / SQLite）
//! - **tools**: 工具 trait、注册表、清单与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod store;
pub mod tools;

pub use agent::{build_orchestrator, build_orchestrator_with, Dependencies};
pub use pipeline::{Orchestrator, PipelineEvent, QueryRequest, QueryResponse};
