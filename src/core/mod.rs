//! 核心类型：阶段错误与阶段产出

pub mod error;
pub mod outcome;

pub use error::{
    JobQueueError, LlmError, OrchestratorError, RegistryError, StoreError, ToolError,
};
pub use outcome::{Degradation, StageOutcome};
