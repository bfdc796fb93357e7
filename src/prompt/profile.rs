//! 用户资料：由外部协作方提供，核心只读，仅作为个性化输入

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub title: Option<String>,
    pub signature: Option<String>,
    /// 如 "concise" / "warm" / "formal"
    pub tone_preference: Option<String>,
    pub writing_patterns: Vec<String>,
    pub custom_preferences: BTreeMap<String, String>,
    /// 为 false 时 prompt 不渲染个性化段
    pub use_personalization: bool,
}

impl UserProfile {
    /// 个性化段落；未开启或没有任何可用字段时为 None
    pub fn render(&self) -> Option<String> {
        if !self.use_personalization {
            return None;
        }
        let mut lines = Vec::new();
        if let Some(name) = &self.name {
            lines.push(format!("- The user's name is {name}."));
        }
        if let Some(title) = &self.title {
            lines.push(format!("- Their title is {title}."));
        }
        if let Some(tone) = &self.tone_preference {
            lines.push(format!("- Preferred tone: {tone}."));
        }
        if !self.writing_patterns.is_empty() {
            lines.push(format!(
                "- Writing patterns to mirror: {}.",
                self.writing_patterns.join("; ")
            ));
        }
        if let Some(signature) = &self.signature {
            lines.push(format!(
                "- When drafting emails or messages on their behalf, sign off with:\n{signature}"
            ));
        }
        for (key, value) in &self.custom_preferences {
            lines.push(format!("- {key}: {value}"));
        }
        if lines.is_empty() {
            return None;
        }
        Some(format!("## About the user\n{}", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_requires_flag() {
        let mut profile = UserProfile {
            name: Some("Dana".into()),
            tone_preference: Some("concise".into()),
            ..UserProfile::default()
        };
        assert!(profile.render().is_none());

        profile.use_personalization = true;
        let block = profile.render().unwrap();
        assert!(block.contains("Dana"));
        assert!(block.contains("Preferred tone: concise."));
    }

    #[test]
    fn test_empty_profile_renders_nothing() {
        let profile = UserProfile {
            use_personalization: true,
            ..UserProfile::default()
        };
        assert!(profile.render().is_none());
    }
}
