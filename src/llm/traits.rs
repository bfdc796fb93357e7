//! LLM 客户端抽象
//!
//! 所有后端（Anthropic / OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。
//! 两种模式返回同样的内容与 usage，调用方可以互换。

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use serde::{Deserialize, Serialize};

use crate::core::LlmError;
use crate::memory::Message;

/// 一次模型调用：system prompt + 按时间排序的对话（最后一条为本轮用户输入）
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    /// 提供方未返回用量时为 None
    pub usage: Option<Usage>,
    pub model: String,
}

impl Completion {
    pub fn tokens_used(&self) -> u64 {
        self.usage.map(|u| u.total()).unwrap_or(0)
    }
}

/// 流式输出的一段
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Usage(Usage),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 模型名（写入消息记录的 model_used）
    fn model(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// 流式完成；默认实现退化为一次性返回
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let completion = self.complete(request).await?;
        let mut chunks = vec![Ok(StreamChunk::Text(completion.content))];
        if let Some(usage) = completion.usage {
            chunks.push(Ok(StreamChunk::Usage(usage)));
        }
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// 主 / 备模型；任一侧为 None 表示未配置
#[derive(Clone, Default)]
pub struct ProviderPair {
    pub primary: Option<Arc<dyn LlmClient>>,
    pub fallback: Option<Arc<dyn LlmClient>>,
}

impl ProviderPair {
    pub fn new(primary: Option<Arc<dyn LlmClient>>, fallback: Option<Arc<dyn LlmClient>>) -> Self {
        Self { primary, fallback }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.fallback.is_none()
    }

    /// 主模型优先，否则备用模型
    pub fn preferred(&self) -> Option<&Arc<dyn LlmClient>> {
        self.primary.as_ref().or(self.fallback.as_ref())
    }
}
