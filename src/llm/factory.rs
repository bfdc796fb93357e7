//! 按配置构建主 / 备模型客户端
//!
//! API Key 所在的环境变量未设置时该侧视为「未配置」（None），由 Planner / Synthesizer 决定回退。

use std::sync::Arc;

use crate::config::{LlmSection, ProviderSection};
use crate::llm::{
    create_deepseek_client, AnthropicClient, LlmClient, MockLlmClient, OpenAiClient, ProviderPair,
};

pub fn create_provider(section: &ProviderSection) -> Option<Arc<dyn LlmClient>> {
    let provider = section.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM ({})", section.model);
        return Some(Arc::new(MockLlmClient::new(section.model.clone())));
    }

    let Some(api_key) = section.api_key() else {
        tracing::warn!(
            provider = %provider,
            key_env = section.api_key_env.as_deref().unwrap_or("-"),
            "API key not set, provider not configured"
        );
        return None;
    };
    let base_url = section.base_url.as_deref();

    match provider.as_str() {
        "anthropic" => match AnthropicClient::new(&api_key, &section.model, base_url) {
            Ok(client) => {
                tracing::info!("Using Anthropic LLM ({})", section.model);
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build Anthropic client");
                None
            }
        },
        "openai" => {
            tracing::info!("Using OpenAI LLM ({})", section.model);
            Some(Arc::new(OpenAiClient::new(base_url, &section.model, &api_key)))
        }
        "deepseek" => {
            tracing::info!("Using DeepSeek LLM ({})", section.model);
            Some(Arc::new(create_deepseek_client(
                Some(&section.model),
                base_url,
                &api_key,
            )))
        }
        other => {
            tracing::warn!(provider = other, "Unknown LLM provider");
            None
        }
    }
}

pub fn create_providers(cfg: &LlmSection) -> ProviderPair {
    ProviderPair::new(create_provider(&cfg.primary), create_provider(&cfg.fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_not_configured() {
        let section = ProviderSection {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            base_url: None,
            api_key_env: Some("STEWARD_TEST_KEY_THAT_IS_NEVER_SET".into()),
        };
        assert!(create_provider(&section).is_none());
    }

    #[test]
    fn test_mock_needs_no_key() {
        let section = ProviderSection {
            provider: "mock".into(),
            model: "scripted".into(),
            base_url: None,
            api_key_env: None,
        };
        let client = create_provider(&section).unwrap();
        assert_eq!(client.model(), "scripted");
    }
}
