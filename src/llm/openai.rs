//! OpenAI 兼容 API 客户端（备用模型）
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 OpenAI、DeepSeek、自建代理等。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::core::LlmError;
use crate::llm::{Completion, CompletionRequest, CompletionStream, LlmClient, StreamChunk, Usage};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn to_openai_messages(
        &self,
        system: &str,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let bad = |e: async_openai::error::OpenAIError| LlmError::Api(e.to_string());
        let mut out = Vec::with_capacity(messages.len() + 1);
        out.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system.to_string())
                .build()
                .map_err(bad)?,
        ));
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(bad)?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(bad)?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(bad)?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(&request.system, &request.messages)?)
            .max_completion_tokens(request.max_tokens)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let response = self
            .client
            .chat()
            .create(self.build_request(request)?)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let usage = response.usage.as_ref().map(|u| Usage {
            input_tokens: u.prompt_tokens as u64,
            output_tokens: u.completion_tokens as u64,
        });

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(Completion {
            content,
            usage,
            model: self.model.clone(),
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, LlmError> {
        let upstream = self
            .client
            .chat()
            .create_stream(self.build_request(request)?)
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let chunks = upstream.flat_map(|item| {
            let out: Vec<Result<StreamChunk, LlmError>> = match item {
                Ok(resp) => {
                    let mut v = Vec::new();
                    if let Some(text) = resp.choices.first().and_then(|c| c.delta.content.clone()) {
                        if !text.is_empty() {
                            v.push(Ok(StreamChunk::Text(text)));
                        }
                    }
                    if let Some(u) = resp.usage.as_ref() {
                        v.push(Ok(StreamChunk::Usage(Usage {
                            input_tokens: u.prompt_tokens as u64,
                            output_tokens: u.completion_tokens as u64,
                        })));
                    }
                    v
                }
                Err(e) => vec![Err(LlmError::Stream(e.to_string()))],
            };
            stream::iter(out)
        });
        Ok(Box::pin(chunks))
    }
}
