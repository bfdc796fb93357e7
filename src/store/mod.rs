//! 外部存储抽象
//!
//! 编排核心只通过 Store 访问会话消息、用户偏好与用户资料；每次写入都是独立的原子操作，
//! 不跨多步计划持有事务。

pub mod in_memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::memory::{Message, Role, UserPreference};
use crate::prompt::UserProfile;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// 偏好强化参数：新建时的置信度、冲突时的增量（封顶 1.0）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reinforcement {
    pub initial: f64,
    pub increment: f64,
}

impl Reinforcement {
    /// 冲突时的新置信度
    pub fn apply(&self, current: f64) -> f64 {
        (current + self.increment).min(1.0)
    }
}

/// 持久化的消息记录；plan_json / tool_calls / sources 为 JSON 文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 为空时写入是静默 no-op
    pub session_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub model_used: Option<String>,
    pub tokens_used: u64,
    pub plan_json: Option<String>,
    pub tool_calls: Option<String>,
    pub sources: Option<String>,
    pub job_id: Option<String>,
    pub job_status: Option<String>,
}

impl MessageRecord {
    pub fn new(session_id: Option<&str>, role: Role, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.map(String::from),
            role,
            content: content.into(),
            model_used: None,
            tokens_used: 0,
            plan_json: None,
            tool_calls: None,
            sources: None,
            job_id: None,
            job_status: None,
        }
    }
}

/// 存储接口
#[async_trait]
pub trait Store: Send + Sync {
    /// 最近 limit 条消息，按时间正序
    async fn load_history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// 追加一条消息；首条消息时创建会话；session_id 为空时直接返回 Ok
    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError>;

    async fn load_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>, StoreError>;

    /// 原子 upsert：不存在时以 initial 插入，存在时置信度 +increment 并封顶 1.0；返回新置信度
    async fn reinforce_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        reinforcement: Reinforcement,
    ) -> Result<f64, StoreError>;

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
}
