//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序返回预置回复；可模拟失败、延迟与流中途断开 / 卡住，并记录每次收到的请求。
//! 队列为空时回显最后一条用户消息。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::core::LlmError;
use crate::llm::{Completion, CompletionRequest, CompletionStream, LlmClient, StreamChunk, Usage};
use crate::memory::Role;

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
    Delayed(Duration, String),
    /// 先输出部分文本，再以流错误结束
    Broken(String, String),
    /// 先输出部分文本，之后不再产出
    Stalled(String),
}

pub struct MockLlmClient {
    model: String,
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    usage: Option<Usage>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            usage: None,
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(MockReply::Text(text.into()))
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(MockReply::Fail(message.into()))
    }

    pub fn reply_after(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(MockReply::Delayed(delay, text.into()))
    }

    pub fn fail_mid_stream(self, partial: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(MockReply::Broken(partial.into(), message.into()))
    }

    pub fn stall_mid_stream(self, partial: impl Into<String>) -> Self {
        self.push(MockReply::Stalled(partial.into()))
    }

    /// 每次调用报告的用量
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn push(self, reply: MockReply) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
        self
    }

    /// 取下一条回复；Fail 直接转为错误，Delayed 等待后转为 Text
    async fn next_reply(&self, request: &CompletionRequest) -> Result<MockReply, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let reply = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match reply {
            Some(MockReply::Fail(m)) => Err(LlmError::Api(m)),
            Some(MockReply::Delayed(d, t)) => {
                tokio::time::sleep(d).await;
                Ok(MockReply::Text(t))
            }
            Some(other) => Ok(other),
            None => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(MockReply::Text(format!("Echo from Mock: {last_user}")))
            }
        }
    }
}

/// 按空白切分并保留空白，模拟逐 token 输出
fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c.is_whitespace() {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let content = match self.next_reply(request).await? {
            MockReply::Broken(_, message) => return Err(LlmError::Stream(message)),
            MockReply::Stalled(_) => return std::future::pending().await,
            MockReply::Text(t) | MockReply::Delayed(_, t) | MockReply::Fail(t) => t,
        };
        Ok(Completion {
            content,
            usage: self.usage,
            model: self.model.clone(),
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let text = |content: &str| -> Vec<Result<StreamChunk, LlmError>> {
            split_chunks(content)
                .into_iter()
                .map(|c| Ok(StreamChunk::Text(c)))
                .collect()
        };
        match self.next_reply(request).await? {
            MockReply::Broken(partial, message) => {
                let mut chunks = text(&partial);
                chunks.push(Err(LlmError::Stream(message)));
                Ok(Box::pin(stream::iter(chunks)))
            }
            MockReply::Stalled(partial) => Ok(Box::pin(stream::iter(text(&partial)).chain(stream::pending()))),
            MockReply::Text(content) | MockReply::Delayed(_, content) | MockReply::Fail(content) => {
                let mut chunks = text(&content);
                if let Some(usage) = self.usage {
                    chunks.push(Ok(StreamChunk::Usage(usage)));
                }
                Ok(Box::pin(stream::iter(chunks)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let mock = MockLlmClient::new("m").reply("one").fail("down");
        let req = CompletionRequest::new("sys", vec![Message::user("hi")]);
        assert_eq!(mock.complete(&req).await.unwrap().content, "one");
        assert!(mock.complete(&req).await.is_err());
        assert_eq!(
            mock.complete(&req).await.unwrap().content,
            "Echo from Mock: hi"
        );
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests()[0].system, "sys");
    }

    #[tokio::test]
    async fn test_broken_stream_yields_partial_then_error() {
        let mock = MockLlmClient::new("m").fail_mid_stream("half an ", "connection reset");
        let req = CompletionRequest::new("sys", vec![Message::user("hi")]);
        let items: Vec<_> = mock.complete_stream(&req).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &StreamChunk::Text("half ".into()));
        assert!(matches!(&items[2], Err(LlmError::Stream(m)) if m == "connection reset"));
    }

    #[test]
    fn test_split_chunks_roundtrip() {
        let text = "Found 3 clients.\nDone";
        assert_eq!(split_chunks(text).concat(), text);
        assert_eq!(split_chunks(text).len(), 4);
    }
}
