//! 用户长期偏好网关
//!
//! 规划前读取 (user, key) -> value 偏好；查询结束后按本次工具使用频率异步强化 `frequent_tool_<name>`。
//! 读失败降级为空偏好，写失败只记日志，二者都不会影响查询本身。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::MemorySection;
use crate::pipeline::ToolResult;
use crate::store::{Reinforcement, Store};

/// 偏好键前缀：高频工具
pub const FREQUENT_TOOL_PREFIX: &str = "frequent_tool_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: String,
    pub preference_key: String,
    pub preference_value: String,
    /// [0, 1]，强化只会上调，封顶 1.0
    pub confidence_score: f64,
}

/// 按 preference_key 排序的偏好表（保证 prompt 渲染顺序稳定）
pub type Preferences = BTreeMap<String, UserPreference>;

/// 统计单次查询中每个工具的调用次数
pub fn tally_tool_usage(results: &[ToolResult]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for r in results {
        *counts.entry(r.tool_call.tool.clone()).or_insert(0) += 1;
    }
    counts
}

/// 仅数字 user_id 参与记忆更新（排除系统 / 匿名调用方）
pub fn is_memory_eligible(user_id: &str) -> bool {
    !user_id.is_empty() && user_id.parse::<i64>().is_ok()
}

pub struct PreferenceGateway {
    store: Arc<dyn Store>,
    config: MemorySection,
}

impl PreferenceGateway {
    pub fn new(store: Arc<dyn Store>, config: MemorySection) -> Self {
        Self { store, config }
    }

    /// 读取用户偏好；存储出错时返回空表
    pub async fn get_preferences(&self, user_id: &str) -> Preferences {
        match self.store.load_preferences(user_id).await {
            Ok(list) => list
                .into_iter()
                .map(|p| (p.preference_key.clone(), p))
                .collect(),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load preferences, continuing without");
                Preferences::new()
            }
        }
    }

    /// 按本次查询的工具使用次数强化偏好，返回成功写入的条数
    pub async fn update_memory(&self, user_id: &str, results: &[ToolResult]) -> usize {
        if !is_memory_eligible(user_id) {
            tracing::debug!(user_id, "Skipping memory update for non-numeric user id");
            return 0;
        }

        let reinforcement = Reinforcement {
            initial: self.config.initial_confidence,
            increment: self.config.confidence_increment,
        };
        let mut written = 0;
        for (tool, count) in tally_tool_usage(results) {
            if count < self.config.reinforcement_threshold {
                continue;
            }
            let key = format!("{FREQUENT_TOOL_PREFIX}{tool}");
            match self
                .store
                .reinforce_preference(user_id, &key, &count.to_string(), reinforcement)
                .await
            {
                Ok(confidence) => {
                    tracing::info!(user_id, key = %key, confidence, "Preference reinforced");
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!(user_id, key = %key, error = %e, "Failed to reinforce preference");
                }
            }
        }
        written
    }

    /// 后台执行 update_memory，不阻塞调用方
    pub fn spawn_update(self: &Arc<Self>, user_id: String, results: Vec<ToolResult>) -> JoinHandle<usize> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move { gateway.update_memory(&user_id, &results).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreError;
    use crate::pipeline::{ToolCallRecord, ToolResult};
    use crate::store::InMemoryStore;

    fn result(tool: &str) -> ToolResult {
        ToolResult::failure(
            1,
            ToolCallRecord {
                tool: tool.to_string(),
                params: serde_json::json!({}),
                reason: String::new(),
            },
            "irrelevant",
        )
    }

    #[test]
    fn test_tally_tool_usage() {
        let counts = tally_tool_usage(&[result("a"), result("b"), result("a")]);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&1));
    }

    #[test]
    fn test_memory_eligibility() {
        assert!(is_memory_eligible("42"));
        assert!(!is_memory_eligible("system"));
        assert!(!is_memory_eligible(""));
    }

    #[tokio::test]
    async fn test_update_memory_only_frequent_tools() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = PreferenceGateway::new(store.clone(), MemorySection::default());

        let written = gateway
            .update_memory("7", &[result("search"), result("search"), result("email")])
            .await;
        assert_eq!(written, 1);

        let prefs = gateway.get_preferences("7").await;
        let pref = prefs.get("frequent_tool_search").unwrap();
        assert!((pref.confidence_score - 0.6).abs() < 1e-9);
        assert!(!prefs.contains_key("frequent_tool_email"));
    }

    #[tokio::test]
    async fn test_update_memory_skips_non_numeric_user() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = PreferenceGateway::new(store.clone(), MemorySection::default());
        let written = gateway
            .update_memory("anonymous", &[result("search"), result("search")])
            .await;
        assert_eq!(written, 0);
        assert!(gateway.get_preferences("anonymous").await.is_empty());
    }

    #[tokio::test]
    async fn test_reinforcement_is_capped() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = PreferenceGateway::new(store.clone(), MemorySection::default());
        let results = [result("search"), result("search")];
        for _ in 0..8 {
            gateway.update_memory("1", &results).await;
        }
        let prefs = gateway.get_preferences("1").await;
        let confidence = prefs["frequent_tool_search"].confidence_score;
        assert!(confidence <= 1.0);
        assert!((confidence - 1.0).abs() < 1e-9);
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl Store for BrokenStore {
        async fn load_history(
            &self,
            _session_id: &str,
            _limit: usize,
        ) -> Result<Vec<crate::memory::Message>, StoreError> {
            Err(StoreError::Other("down".into()))
        }

        async fn save_message(&self, _record: &crate::store::MessageRecord) -> Result<(), StoreError> {
            Err(StoreError::Other("down".into()))
        }

        async fn load_preferences(&self, _user_id: &str) -> Result<Vec<UserPreference>, StoreError> {
            Err(StoreError::Other("down".into()))
        }

        async fn reinforce_preference(
            &self,
            _user_id: &str,
            _key: &str,
            _value: &str,
            _reinforcement: Reinforcement,
        ) -> Result<f64, StoreError> {
            Err(StoreError::Other("down".into()))
        }

        async fn load_profile(
            &self,
            _user_id: &str,
        ) -> Result<Option<crate::prompt::UserProfile>, StoreError> {
            Err(StoreError::Other("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade() {
        let gateway = PreferenceGateway::new(Arc::new(BrokenStore), MemorySection::default());
        assert!(gateway.get_preferences("1").await.is_empty());
        assert_eq!(
            gateway
                .update_memory("1", &[result("search"), result("search")])
                .await,
            0
        );
    }
}
