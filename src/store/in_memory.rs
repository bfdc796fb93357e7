//! 内存存储：测试与无数据库运行时使用

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageRecord, Reinforcement, Store};
use crate::core::StoreError;
use crate::memory::{Message, UserPreference};
use crate::prompt::UserProfile;

#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<String, Vec<MessageRecord>>>,
    preferences: RwLock<HashMap<(String, String), UserPreference>>,
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_profile(&self, user_id: &str, profile: UserProfile) {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile);
    }

    pub async fn put_preference(&self, pref: UserPreference) {
        self.preferences.write().await.insert(
            (pref.user_id.clone(), pref.preference_key.clone()),
            pref,
        );
    }

    /// 会话内全部消息记录（含 plan_json 等字段）
    pub async fn records(&self, session_id: &str) -> Vec<MessageRecord> {
        self.messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let records = messages.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        let skip = records.len().saturating_sub(limit);
        Ok(records[skip..]
            .iter()
            .map(|r| Message {
                role: r.role,
                content: r.content.clone(),
            })
            .collect())
    }

    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let Some(session_id) = record.session_id.as_deref() else {
            return Ok(());
        };
        self.messages
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>, StoreError> {
        let prefs = self.preferences.read().await;
        let mut list: Vec<UserPreference> = prefs
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.preference_key.cmp(&b.preference_key));
        Ok(list)
    }

    async fn reinforce_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        reinforcement: Reinforcement,
    ) -> Result<f64, StoreError> {
        let mut prefs = self.preferences.write().await;
        let entry = prefs
            .entry((user_id.to_string(), key.to_string()))
            .and_modify(|p| {
                p.preference_value = value.to_string();
                p.confidence_score = reinforcement.apply(p.confidence_score);
            })
            .or_insert_with(|| UserPreference {
                user_id: user_id.to_string(),
                preference_key: key.to_string(),
                preference_value: value.to_string(),
                confidence_score: reinforcement.initial,
            });
        Ok(entry.confidence_score)
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;

    #[tokio::test]
    async fn test_save_without_session_is_noop() {
        let store = InMemoryStore::new();
        store
            .save_message(&MessageRecord::new(None, Role::User, "hello"))
            .await
            .unwrap();
        assert!(store.messages.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_latest_in_order() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .save_message(&MessageRecord::new(Some("s1"), Role::User, format!("m{i}")))
                .await
                .unwrap();
        }
        let history = store.load_history("s1", 2).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }
}
