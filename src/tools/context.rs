//! 工具调用上下文：用户 / 客户 / 项目 / 会话标识，以及存储与任务队列句柄

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::jobs::JobQueue;
use crate::store::Store;

#[derive(Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub session_id: Option<String>,
    pub store: Arc<dyn Store>,
    pub jobs: Arc<dyn JobQueue>,
    /// 查询级取消令牌；长时间运行的工具应自行检查
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("project_id", &self.project_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
