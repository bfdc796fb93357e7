//! SQLite 持久化（sqlx）
//!
//! 表：sessions / messages / user_preferences / user_profiles。
//! 偏好强化用单条 `INSERT .. ON CONFLICT DO UPDATE`，保证并发查询下也是原子的。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{MessageRecord, Reinforcement, Store};
use crate::core::StoreError;
use crate::memory::{Message, Role, UserPreference};
use crate::prompt::UserProfile;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接数据库并建表，url 形如 `sqlite:steward.db?mode=rwc`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// 以文件路径打开（不存在则创建）
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        Self::connect(&url, 5).await
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                model_used TEXT,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                plan_json TEXT,
                tool_calls TEXT,
                sources TEXT,
                job_id TEXT,
                job_status TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT NOT NULL,
                preference_key TEXT NOT NULL,
                preference_value TEXT NOT NULL,
                confidence_score REAL NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, preference_key)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                profile_json TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 写入用户资料（资料本身由外部系统维护，这里仅供运行与测试时填充）
    pub async fn put_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let json = serde_json::to_string(profile)?;
        sqlx::query(
            "INSERT INTO user_profiles (user_id, profile_json) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET profile_json = excluded.profile_json",
        )
        .bind(user_id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, content FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(|row| -> Result<Message, sqlx::Error> {
                let role: String = row.try_get("role")?;
                let content: String = row.try_get("content")?;
                Ok(Message {
                    role: Role::parse(&role),
                    content,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn save_message(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let Some(session_id) = record.session_id.as_deref() else {
            return Ok(());
        };
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO messages (session_id, role, content, model_used, tokens_used, plan_json,
                tool_calls, sources, job_id, job_status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(record.role.as_str())
        .bind(&record.content)
        .bind(&record.model_used)
        .bind(record.tokens_used as i64)
        .bind(&record.plan_json)
        .bind(&record.tool_calls)
        .bind(&record.sources)
        .bind(&record.job_id)
        .bind(&record.job_status)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_preferences(&self, user_id: &str) -> Result<Vec<UserPreference>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, preference_key, preference_value, confidence_score
             FROM user_preferences WHERE user_id = ? ORDER BY preference_key",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let prefs = rows
            .iter()
            .map(|row| -> Result<UserPreference, sqlx::Error> {
                Ok(UserPreference {
                    user_id: row.try_get("user_id")?,
                    preference_key: row.try_get("preference_key")?,
                    preference_value: row.try_get("preference_value")?,
                    confidence_score: row.try_get("confidence_score")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        Ok(prefs)
    }

    async fn reinforce_preference(
        &self,
        user_id: &str,
        key: &str,
        value: &str,
        reinforcement: Reinforcement,
    ) -> Result<f64, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let row = sqlx::query(
            "INSERT INTO user_preferences
                (user_id, preference_key, preference_value, confidence_score, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, preference_key) DO UPDATE SET
                preference_value = excluded.preference_value,
                confidence_score = MIN(user_preferences.confidence_score + ?, 1.0),
                updated_at = excluded.updated_at
             RETURNING confidence_score",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .bind(reinforcement.initial)
        .bind(&now)
        .bind(reinforcement.increment)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("confidence_score")?)
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT profile_json FROM user_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("profile_json")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("steward.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_message_roundtrip_and_history_order() {
        let (_dir, store) = temp_store().await;
        let mut record = MessageRecord::new(Some("s1"), Role::User, "first");
        store.save_message(&record).await.unwrap();
        record.role = Role::Assistant;
        record.content = "second".into();
        record.plan_json = Some("{\"steps\":[]}".into());
        store.save_message(&record).await.unwrap();

        let history = store.load_history("s1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::user("first"));
        assert_eq!(history[1], Message::assistant("second"));
        assert!(store.load_history("other", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_without_session_is_noop() {
        let (_dir, store) = temp_store().await;
        store
            .save_message(&MessageRecord::new(None, Role::User, "lost"))
            .await
            .unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.try_get("n").unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_reinforce_inserts_then_caps() {
        let (_dir, store) = temp_store().await;
        let r = Reinforcement {
            initial: 0.6,
            increment: 0.1,
        };
        let first = store
            .reinforce_preference("1", "frequent_tool_search", "2", r)
            .await
            .unwrap();
        assert!((first - 0.6).abs() < 1e-9);

        let mut last = first;
        for _ in 0..10 {
            last = store
                .reinforce_preference("1", "frequent_tool_search", "3", r)
                .await
                .unwrap();
        }
        assert!(last <= 1.0);
        assert!((last - 1.0).abs() < 1e-9);

        let prefs = store.load_preferences("1").await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].preference_value, "3");
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let (_dir, store) = temp_store().await;
        assert!(store.load_profile("1").await.unwrap().is_none());
        let profile = UserProfile {
            name: Some("Dana".into()),
            use_personalization: true,
            ..UserProfile::default()
        };
        store.put_profile("1", &profile).await.unwrap();
        assert_eq!(store.load_profile("1").await.unwrap(), Some(profile));
    }
}
