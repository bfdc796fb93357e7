//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STEWARD__*` 覆盖（双下划线表示嵌套，如 `STEWARD__LLM__PRIMARY__MODEL=...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub memory: MemorySection,
    pub store: StoreSection,
}

/// [app] 段：应用名、对话轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 规划时带入的历史轮数（每轮 user + assistant 两条）
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: 20,
        }
    }
}

impl AppSection {
    pub fn history_limit(&self) -> usize {
        self.max_context_turns * 2
    }
}

/// [llm] 段：主备模型、合成时限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub primary: ProviderSection,
    pub fallback: ProviderSection,
    /// 合成阶段硬时限（秒），超时返回降级回复
    pub synthesis_timeout_secs: u64,
    pub max_tokens: u32,
    /// 保留的开关：转写分析类查询是否偏向备用模型；目前主模型总是先尝试
    pub use_fallback_for_transcripts: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            primary: ProviderSection::anthropic(),
            fallback: ProviderSection::openai(),
            synthesis_timeout_secs: 45,
            max_tokens: 4096,
            use_fallback_for_transcripts: false,
        }
    }
}

impl LlmSection {
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

/// [llm.primary] / [llm.fallback]：后端名、模型、端点与 API Key 环境变量名
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    /// anthropic / openai / deepseek / mock
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量；未设置时视为「未配置」
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderSection {
    fn anthropic() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            base_url: None,
            api_key_env: Some("ANTHROPIC_API_KEY".into()),
        }
    }

    fn openai() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".into()),
        }
    }

    /// 从 api_key_env 指定的环境变量读取 Key
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self::anthropic()
    }
}

/// [tools] 段：单次工具调用超时（秒）；不设置则不限时
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub timeout_secs: Option<u64>,
}

impl ToolsSection {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// [memory] 段：工具使用频率强化偏好的参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// 单次查询内同一工具使用次数达到该值才记为偏好
    pub reinforcement_threshold: usize,
    pub initial_confidence: f64,
    pub confidence_increment: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            reinforcement_threshold: 2,
            initial_confidence: 0.6,
            confidence_increment: 0.1,
        }
    }
}

/// [store] 段：SQLite 连接串
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: "sqlite:steward.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量 STEWARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STEWARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STEWARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.synthesis_timeout_secs, 45);
        assert_eq!(cfg.llm.primary.provider, "anthropic");
        assert_eq!(cfg.llm.fallback.provider, "openai");
        assert_eq!(cfg.memory.reinforcement_threshold, 2);
        assert!(cfg.tools.timeout().is_none());
        assert_eq!(cfg.app.history_limit(), 40);
    }

    #[test]
    fn test_load_from_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[llm]
synthesis_timeout_secs = 10

[llm.primary]
provider = "mock"
model = "scripted"

[tools]
timeout_secs = 5
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.synthesis_timeout_secs, 10);
        assert_eq!(cfg.llm.primary.provider, "mock");
        assert_eq!(cfg.llm.fallback.provider, "openai");
        assert_eq!(cfg.tools.timeout(), Some(Duration::from_secs(5)));
    }
}
