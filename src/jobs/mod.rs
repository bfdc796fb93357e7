//! 异步任务队列句柄
//!
//! 工具可通过 ToolContext 投递后台任务并返回 job_id；编排器只负责把最近一次的 job_id / status
//! 写到助手消息上，不轮询任务状态。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::JobQueueError;

/// 待投递的后台任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: String,
    pub payload: serde_json::Value,
    pub user_id: String,
    pub session_id: Option<String>,
}

/// 工具结果中携带的任务引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: String,
    pub status: Option<String>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 投递任务，返回 job_id
    async fn enqueue(&self, job: JobRequest) -> Result<String, JobQueueError>;
}

/// 进程内队列：只记录投递过的任务，由宿主进程自行消费
#[derive(Default, Clone)]
pub struct InMemoryJobQueue {
    jobs: Arc<RwLock<Vec<(String, JobRequest)>>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending(&self) -> Vec<(String, JobRequest)> {
        self.jobs.read().await.clone()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<String, JobQueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(job_id = %id, kind = %job.kind, "Job enqueued");
        self.jobs.write().await.push((id.clone(), job));
        Ok(id)
    }
}
