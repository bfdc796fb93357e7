//! Anthropic Messages API 客户端（主模型）
//!
//! 直接用 reqwest 调用 /v1/messages；流式模式解析 SSE：
//! message_start（输入 token）-> content_block_delta（文本增量）-> message_delta（输出 token）-> message_stop。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};

use crate::core::LlmError;
use crate::llm::{Completion, CompletionRequest, CompletionStream, LlmClient, StreamChunk, Usage};
use crate::memory::{Message, Role};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(Duration::from_secs(300)).build()?;
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": to_anthropic_messages(&request.messages),
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {text}")));
        }
        Ok(response)
    }
}

/// 转为 Anthropic 消息：丢弃 system（走独立字段），合并相邻同角色消息，保证首条为 user
pub(crate) fn to_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut merged: Vec<(Role, String)> = Vec::new();
    for m in messages.iter().filter(|m| m.role != Role::System) {
        match merged.last_mut() {
            Some((role, content)) if *role == m.role => {
                content.push_str("\n\n");
                content.push_str(&m.content);
            }
            _ => merged.push((m.role, m.content.clone())),
        }
    }
    if matches!(merged.first(), Some((Role::Assistant, _))) {
        merged.remove(0);
    }
    merged
        .into_iter()
        .map(|(role, content)| json!({ "role": role.as_str(), "content": content }))
        .collect()
}

fn parse_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: v["output_tokens"].as_u64().unwrap_or(0),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let response = self.send(&self.body(request, false)).await?;
        let v: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = v["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| LlmError::Parse("response has no content".to_string()))?;
        let usage = v.get("usage").map(parse_usage);

        Ok(Completion {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let response = self.send(&self.body(request, true)).await?;
        let byte_stream = response.bytes_stream();

        let chunks = stream::unfold(
            (byte_stream, SseParser::default(), false),
            |(mut bytes, mut parser, mut finished)| async move {
                loop {
                    if let Some(item) = parser.next_chunk() {
                        return Some((item, (bytes, parser, finished)));
                    }
                    if finished {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(b)) => parser.push(&b),
                        Some(Err(e)) => {
                            return Some((
                                Err(LlmError::Stream(format!("stream read error: {e}"))),
                                (bytes, parser, true),
                            ))
                        }
                        None => {
                            parser.finish();
                            finished = true;
                        }
                    }
                }
            },
        );
        Ok(Box::pin(chunks))
    }
}

/// SSE 事件解析状态：跨网络分片缓存未完整的事件，累计 usage
///
/// 按字节缓存，只对完整事件做 UTF-8 解码；多字节字符被切在两个分片之间时不会损坏。
#[derive(Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    pending: std::collections::VecDeque<Result<StreamChunk, LlmError>>,
    usage: Usage,
}

impl SseParser {
    pub fn push(&mut self, bytes: &[u8]) {
        // \r 只出现在行尾（JSON 内部会被转义），直接丢弃即可统一为 \n
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.process_event(&String::from_utf8_lossy(&event[..end]));
        }
    }

    /// 流结束时处理残留的最后一个事件
    pub fn finish(&mut self) {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        if !rest.trim().is_empty() {
            self.process_event(rest.trim());
        }
    }

    pub fn next_chunk(&mut self) -> Option<Result<StreamChunk, LlmError>> {
        self.pending.pop_front()
    }

    fn process_event(&mut self, event: &str) {
        let data: String = event
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim)
            .collect();
        if data.is_empty() {
            return;
        }
        let v: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                self.pending
                    .push_back(Err(LlmError::Stream(format!("bad SSE payload: {e}"))));
                return;
            }
        };
        match v["type"].as_str() {
            Some("message_start") => {
                self.usage.input_tokens = v["message"]["usage"]["input_tokens"].as_u64().unwrap_or(0);
            }
            Some("content_block_delta") => {
                if let Some(text) = v["delta"]["text"].as_str() {
                    if !text.is_empty() {
                        self.pending.push_back(Ok(StreamChunk::Text(text.to_string())));
                    }
                }
            }
            Some("message_delta") => {
                if let Some(out) = v["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = out;
                    self.pending.push_back(Ok(StreamChunk::Usage(self.usage)));
                }
            }
            Some("error") => {
                let msg = v["error"]["message"].as_str().unwrap_or("unknown error");
                self.pending.push_back(Err(LlmError::Api(msg.to_string())));
            }
            _ => {}
        }
    }
}
