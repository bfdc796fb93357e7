//! 合成阶段：执行结果 → 带来源标注的自然语言回答
//!
//! 主模型优先；主模型在输出任何文本前出错时，透明地用备用模型重试一次。已向调用方流出部分文本后
//! 出错则直接返回错误，不再拼接备用模型的输出。整个调用受硬时限约束，超时返回固定降级文本
//! （tokens_used = 0）。只放弃等待，已发出的请求不保证在服务端被取消。
//! 有事件通道时以流式转发 response_chunk，同时累积最终文本；两种模式返回同样的 SynthesisResult，
//! 且流出的 response_chunk 拼接后总是等于 content。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{Degradation, LlmError, OrchestratorError, StageOutcome};
use crate::llm::{CompletionRequest, LlmClient, ProviderPair, StreamChunk, Usage};
use crate::memory::Message;
use crate::pipeline::events::{ANALYZING_RESULTS, GENERATING_RESPONSE, VERIFYING};
use crate::pipeline::{EventSink, PipelineEvent, ToolResult};
use crate::prompt::{build_synthesis_prompt, PromptInputs};

pub const TRANSCRIPT_KEYWORDS: &[&str] = &[
    "transcript",
    "meeting",
    "call",
    "action item",
    "follow up",
    "follow-up",
    "commitment",
];

pub const TIMEOUT_RESPONSE: &str = "I found relevant information for your request, but putting the full answer together took longer than expected. Please ask again or narrow the question and I will pick it up from there.";

/// 超时降级时写入 model 的标记
pub const TIMEOUT_MODEL: &str = "timeout";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisResult {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
}

/// 用户消息含关键词，或任一步骤使用了转写类工具 / 来源
pub fn is_transcript_analysis(user_message: &str, results: &[ToolResult]) -> bool {
    let lower = user_message.to_lowercase();
    TRANSCRIPT_KEYWORDS.iter().any(|k| lower.contains(k))
        || results.iter().any(|r| {
            r.tool_call.tool.to_lowercase().contains("transcript")
                || r.source.source_type.to_lowercase().contains("transcript")
        })
}

pub struct Synthesizer {
    providers: ProviderPair,
    timeout: Duration,
    max_tokens: u32,
    use_fallback_for_transcripts: bool,
}

impl Synthesizer {
    pub fn new(providers: ProviderPair, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            providers,
            timeout,
            max_tokens,
            use_fallback_for_transcripts: false,
        }
    }

    pub fn with_transcript_fallback_flag(mut self, flag: bool) -> Self {
        self.use_fallback_for_transcripts = flag;
        self
    }

    pub async fn synthesize(
        &self,
        inputs: &PromptInputs<'_>,
        history: &[Message],
        results: &[ToolResult],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<SynthesisResult>, OrchestratorError> {
        if self.providers.is_empty() {
            return Err(OrchestratorError::NoProvider);
        }

        events.emit(PipelineEvent::stage(ANALYZING_RESULTS));
        let transcript = is_transcript_analysis(inputs.user_message, results);
        if transcript {
            events.emit(PipelineEvent::stage(VERIFYING));
            if self.use_fallback_for_transcripts {
                tracing::debug!("use_fallback_for_transcripts is set; primary is still attempted first");
            }
        }
        events.emit(PipelineEvent::stage(GENERATING_RESPONSE));

        let system = build_synthesis_prompt(inputs, results, transcript);
        let mut messages = history.to_vec();
        messages.push(Message::user(inputs.user_message));
        let request = CompletionRequest::new(system, messages).with_max_tokens(self.max_tokens);

        let relay = ChunkRelay::new(events);
        let attempt = tokio::time::timeout(self.timeout, self.generate(&request, &relay));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            r = attempt => r,
        };

        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(
                    model = %result.value().model,
                    tokens = result.value().tokens_used,
                    fallback = result.is_degraded(),
                    "Synthesis complete"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(OrchestratorError::Synthesis(e)),
            Err(_) => {
                let partial = relay.sent();
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    partial_chars = partial.chars().count(),
                    "Synthesis timed out, returning degraded response"
                );
                // 已流出的部分文本保留在 content 里，降级文本接在其后
                let tail = if partial.is_empty() {
                    TIMEOUT_RESPONSE.to_string()
                } else {
                    format!("\n\n{TIMEOUT_RESPONSE}")
                };
                relay.forward(tail.clone());
                Ok(StageOutcome::degraded(
                    SynthesisResult {
                        content: partial + &tail,
                        tokens_used: 0,
                        model: TIMEOUT_MODEL.to_string(),
                    },
                    Degradation::SynthesisTimeout,
                ))
            }
        }
    }

    /// 主模型 → (出错且未流出文本) → 备用模型；未配置主模型时直接用备用模型
    async fn generate(
        &self,
        request: &CompletionRequest,
        relay: &ChunkRelay<'_>,
    ) -> Result<StageOutcome<SynthesisResult>, LlmError> {
        let Some(primary) = &self.providers.primary else {
            let fallback = self
                .providers
                .fallback
                .as_ref()
                .ok_or_else(|| LlmError::NotConfigured("fallback".into()))?;
            return call(fallback, request, relay).await.map(StageOutcome::Complete);
        };

        match call(primary, request, relay).await {
            Ok(result) => Ok(StageOutcome::Complete(result)),
            Err(e) => {
                let Some(fallback) = &self.providers.fallback else {
                    return Err(e);
                };
                if relay.has_sent() {
                    tracing::warn!(
                        primary = primary.model(),
                        error = %e,
                        "Primary provider failed mid-stream, not retrying on fallback"
                    );
                    return Err(e);
                }
                tracing::warn!(
                    primary = primary.model(),
                    fallback = fallback.model(),
                    error = %e,
                    "Primary provider failed, retrying synthesis on fallback"
                );
                let result = call(fallback, request, relay).await?;
                Ok(StageOutcome::degraded(result, Degradation::FallbackProvider))
            }
        }
    }
}

/// 转发 response_chunk，并记下已流出的文本
struct ChunkRelay<'a> {
    events: &'a EventSink,
    sent: Mutex<String>,
}

impl<'a> ChunkRelay<'a> {
    fn new(events: &'a EventSink) -> Self {
        Self {
            events,
            sent: Mutex::new(String::new()),
        }
    }

    fn is_streaming(&self) -> bool {
        self.events.is_streaming()
    }

    fn forward(&self, text: String) {
        if !self.events.is_streaming() {
            return;
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push_str(&text);
        }
        self.events.emit(PipelineEvent::ResponseChunk { text });
    }

    fn has_sent(&self) -> bool {
        self.sent.lock().map(|s| !s.is_empty()).unwrap_or(false)
    }

    fn sent(&self) -> String {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

async fn call(
    llm: &Arc<dyn LlmClient>,
    request: &CompletionRequest,
    relay: &ChunkRelay<'_>,
) -> Result<SynthesisResult, LlmError> {
    if !relay.is_streaming() {
        let completion = llm.complete(request).await?;
        return Ok(SynthesisResult {
            tokens_used: completion.tokens_used(),
            content: completion.content,
            model: completion.model,
        });
    }

    let mut stream = llm.complete_stream(request).await?;
    let mut content = String::new();
    let mut usage: Option<Usage> = None;
    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Text(text) => {
                content.push_str(&text);
                relay.forward(text);
            }
            // 各家 usage 为累计快照，取最后一次
            StreamChunk::Usage(u) => usage = Some(u),
        }
    }
    Ok(SynthesisResult {
        content,
        tokens_used: usage.map(|u| u.total()).unwrap_or(0),
        model: llm.model().to_string(),
    })
}
