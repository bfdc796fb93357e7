//! LLM 层：客户端抽象与实现（Anthropic / OpenAI 兼容 / DeepSeek / Mock）

pub mod anthropic;
pub mod deepseek;
pub mod factory;
pub mod mock;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use factory::{create_provider, create_providers};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{
    Completion, CompletionRequest, CompletionStream, LlmClient, ProviderPair, StreamChunk, Usage,
};
