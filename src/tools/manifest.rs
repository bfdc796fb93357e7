//! 工具清单：编译期列出的工具构造函数
//!
//! 启动时逐条构造并注册；单个条目构造失败（返回 Err 或 panic）只记日志并跳过，不影响启动。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::tools::{EchoTool, Tool, ToolRegistry};

pub type ToolConstructor = fn(&AppConfig) -> anyhow::Result<Arc<dyn Tool>>;

#[derive(Clone, Copy)]
pub struct ManifestEntry {
    pub name: &'static str,
    pub build: ToolConstructor,
}

/// 被跳过的清单条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTool {
    pub name: String,
    pub reason: String,
}

#[derive(Default, Clone)]
pub struct ToolManifest {
    entries: Vec<ManifestEntry>,
}

impl ToolManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置工具
    pub fn builtin() -> Self {
        Self::new().with("echo", |_| Ok(Arc::new(EchoTool)))
    }

    pub fn with(mut self, name: &'static str, build: ToolConstructor) -> Self {
        self.entries.push(ManifestEntry { name, build });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 构造并注册全部条目，返回注册表与被跳过的条目
    pub fn load(&self, cfg: &AppConfig) -> (ToolRegistry, Vec<SkippedTool>) {
        let mut registry = ToolRegistry::new();
        let mut skipped = Vec::new();

        for entry in &self.entries {
            let built = match catch_unwind(AssertUnwindSafe(|| (entry.build)(cfg))) {
                Ok(Ok(tool)) => tool,
                Ok(Err(e)) => {
                    tracing::warn!(tool = entry.name, error = %e, "Failed to load tool, skipping");
                    skipped.push(SkippedTool {
                        name: entry.name.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(_) => {
                    tracing::warn!(tool = entry.name, "Tool constructor panicked, skipping");
                    skipped.push(SkippedTool {
                        name: entry.name.to_string(),
                        reason: "constructor panicked".to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = registry.register_arc(built) {
                tracing::warn!(tool = entry.name, error = %e, "Failed to register tool, skipping");
                skipped.push(SkippedTool {
                    name: entry.name.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        tracing::info!(
            loaded = registry.len(),
            skipped = skipped.len(),
            "Tool manifest loaded"
        );
        (registry, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ToolOutput};

    fn good(_: &AppConfig) -> anyhow::Result<Arc<dyn Tool>> {
        Ok(Arc::new(FnTool::new("lookup", |_p, _c| async {
            Ok(ToolOutput::ok(serde_json::json!([])))
        })))
    }

    fn failing(_: &AppConfig) -> anyhow::Result<Arc<dyn Tool>> {
        anyhow::bail!("missing credentials")
    }

    fn panicking(_: &AppConfig) -> anyhow::Result<Arc<dyn Tool>> {
        panic!("boom")
    }

    #[test]
    fn test_failed_entries_are_skipped() {
        let manifest = ToolManifest::builtin()
            .with("broken", failing)
            .with("lookup", good)
            .with("exploding", panicking)
            .with("lookup_again", good);
        let (registry, skipped) = manifest.load(&AppConfig::default());

        assert_eq!(registry.tool_names(), vec!["echo", "lookup"]);
        let names: Vec<_> = skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "exploding", "lookup_again"]);
        assert_eq!(skipped[0].reason, "missing credentials");
    }
}
