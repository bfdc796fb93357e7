//! 记忆层：对话消息、用户长期偏好

pub mod conversation;
pub mod preferences;

pub use conversation::{Message, Role};
pub use preferences::{
    is_memory_eligible, tally_tool_usage, PreferenceGateway, Preferences, UserPreference,
    FREQUENT_TOOL_PREFIX,
};
