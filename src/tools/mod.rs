//! 工具层：Tool trait、注册表、编译期清单与带超时 / 审计的执行器

pub mod context;
pub mod echo;
pub mod executor;
pub mod manifest;
pub mod registry;

pub use context::ToolContext;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use manifest::{ManifestEntry, SkippedTool, ToolConstructor, ToolManifest};
pub use registry::{
    FnTool, RegisteredTool, Tool, ToolDescriptor, ToolOutput, ToolRegistry, DEFAULT_CATEGORY,
};
