//! 步骤间引用：`$step<N>.<path>`
//!
//! 字符串在执行前解析一次为 StepReference（步骤号 + 字段 / 下标路径），再对前序步骤 ToolResult 的
//! JSON 形式求值。N 为 1 起始，只能引用当前步骤之前的步骤；解析或求值失败时保留原字符串。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::pipeline::ToolResult;

static REFERENCE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static SEGMENT_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn reference_pattern() -> Option<&'static Regex> {
    REFERENCE_RE
        .get_or_init(|| Regex::new(r"^\$step(\d+)\.(.+)$").ok())
        .as_ref()
}

/// `name`、`name[0]`、`name[0][1]`、`[0]`
fn segment_pattern() -> Option<&'static Regex> {
    SEGMENT_RE
        .get_or_init(|| Regex::new(r"^([^\[\]]*)((?:\[\d+\])*)$").ok())
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReference {
    /// 1 起始
    pub step: usize,
    pub path: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("malformed reference path: {0}")]
    MalformedPath(String),
    #[error("step {step} is not before step {current}")]
    NotEarlier { step: usize, current: usize },
    #[error("no result for step {0}")]
    MissingResult(usize),
    #[error("path not found at segment {0}")]
    PathNotFound(String),
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Field(name) => write!(f, "{name}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, ReferenceError> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let caps = segment_pattern()
            .and_then(|re| re.captures(part))
            .ok_or_else(|| ReferenceError::MalformedPath(path.to_string()))?;
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let indexes = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if name.is_empty() && indexes.is_empty() {
            return Err(ReferenceError::MalformedPath(path.to_string()));
        }
        if !name.is_empty() {
            segments.push(PathSegment::Field(name.to_string()));
        }
        for idx in indexes
            .split(|c| c == '[' || c == ']')
            .filter(|s| !s.is_empty())
        {
            let i = idx
                .parse()
                .map_err(|_| ReferenceError::MalformedPath(path.to_string()))?;
            segments.push(PathSegment::Index(i));
        }
    }
    Ok(segments)
}

impl StepReference {
    /// 非引用语法返回 None；语法匹配但路径非法返回 Some(Err)
    pub fn parse(s: &str) -> Option<Result<Self, ReferenceError>> {
        let caps = reference_pattern()?.captures(s)?;
        let step = match caps[1].parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Some(Err(ReferenceError::MalformedPath(s.to_string()))),
        };
        Some(parse_path(&caps[2]).map(|path| StepReference { step, path }))
    }

    /// 在第 `current`（0 起始）步求值；只允许 0 ≤ step-1 < current
    pub fn resolve(&self, current: usize, prior: &[ToolResult]) -> Result<Value, ReferenceError> {
        let target = self
            .step
            .checked_sub(1)
            .filter(|t| *t < current)
            .ok_or(ReferenceError::NotEarlier {
                step: self.step,
                current: current + 1,
            })?;
        let result = prior
            .get(target)
            .ok_or(ReferenceError::MissingResult(self.step))?;
        let root = serde_json::to_value(result)
            .map_err(|_| ReferenceError::MissingResult(self.step))?;
        self.walk(&root).cloned()
    }

    fn walk<'v>(&self, root: &'v Value) -> Result<&'v Value, ReferenceError> {
        let mut cur = root;
        for seg in &self.path {
            let next = match seg {
                PathSegment::Field(name) => cur.as_object().and_then(|o| o.get(name)),
                PathSegment::Index(i) => cur.as_array().and_then(|a| a.get(*i)),
            };
            cur = next.ok_or_else(|| ReferenceError::PathNotFound(seg.to_string()))?;
        }
        Ok(cur)
    }
}

/// 替换 params 顶层字符串中的引用；失败的保持原样并记 warn
pub fn resolve_params(params: &Value, current: usize, prior: &[ToolResult]) -> Value {
    let Some(obj) = params.as_object() else {
        return params.clone();
    };
    let mut out = Map::with_capacity(obj.len());
    for (key, value) in obj {
        let resolved = match value.as_str().and_then(StepReference::parse) {
            None => value.clone(),
            Some(Ok(reference)) => match reference.resolve(current, prior) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(step = current + 1, param = %key, reference = %value, error = %e, "Unresolved step reference");
                    value.clone()
                }
            },
            Some(Err(e)) => {
                tracing::warn!(step = current + 1, param = %key, reference = %value, error = %e, "Unresolved step reference");
                value.clone()
            }
        };
        out.insert(key.clone(), resolved);
    }
    Value::Object(out)
}
