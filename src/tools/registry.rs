//! 工具注册表
//!
//! 所有工具实现 Tool trait，由 ToolRegistry 按名注册与查找。注册表在启动时构建，
//! 之后只读，可在并发查询间共享（Arc<ToolRegistry>）。
//! describe() 的输出会原样序列化进规划 prompt，其结构属于与模型之间的约定。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RegistryError, ToolError};
use crate::tools::ToolContext;

pub const DEFAULT_CATEGORY: &str = "general";

/// 工具执行返回值；未提供的来源字段由执行器补默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub data_points: Option<Vec<Value>>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_success() -> bool {
    true
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            source_type: None,
            confidence: None,
            data_points: None,
            job_id: None,
            status: None,
        }
    }

    /// 工具自己判定的失败（未抛错，但 success = false）
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            ..Self::ok(Value::Null)
        }
    }

    pub fn with_source(mut self, source_type: impl Into<String>, confidence: f64) -> Self {
        self.source_type = Some(source_type.into());
        self.confidence = Some(confidence);
        self
    }

    pub fn with_data_points(mut self, points: Vec<Value>) -> Self {
        self.data_points = Some(points);
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self.status = Some(status.into());
        self
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、分类、是否需要审批、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；`required` 数组中的参数由 validate_params 检查是否存在
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn category(&self) -> &str {
        DEFAULT_CATEGORY
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

type ToolFn = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<ToolOutput, ToolError>>
    + Send
    + Sync;

/// 由闭包构造的工具，便于清单和测试中快速声明
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    category: String,
    requires_approval: bool,
    handler: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
            category: DEFAULT_CATEGORY.to_string(),
            requires_approval: false,
            handler: Arc::new(
                move |params: Value, ctx: ToolContext| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
                    Box::pin(handler(params, ctx))
                },
            ),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn requires_approval(mut self, flag: bool) -> Self {
        self.requires_approval = flag;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn requires_approval(&self) -> bool {
        self.requires_approval
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        (self.handler)(params, ctx.clone()).await
    }
}

/// 注册后的规范化条目
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub category: String,
    pub requires_approval: bool,
    pub tool: Arc<dyn Tool>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("requires_approval", &self.requires_approval)
            .finish()
    }
}

impl RegisteredTool {
    fn from_tool(tool: Arc<dyn Tool>) -> Result<Self, RegistryError> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidTool("tool name is empty".to_string()));
        }
        let category = match tool.category().trim() {
            "" => DEFAULT_CATEGORY.to_string(),
            c => c.to_string(),
        };
        Ok(Self {
            name,
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
            category,
            requires_approval: tool.requires_approval(),
            tool,
        })
    }

    /// schema 中声明为必填的参数名：`required` 数组，或属性上的 `"required": true`
    pub fn required_parameters(&self) -> Vec<String> {
        let mut required: Vec<String> = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(props) = self.parameters.get("properties").and_then(Value::as_object) {
            for (key, spec) in props {
                let flagged = spec.get("required").and_then(Value::as_bool) == Some(true);
                if flagged && !required.contains(key) {
                    required.push(key.clone());
                }
            }
        }
        required
    }
}

/// 规划 prompt 中的工具目录条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub category: String,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；重名返回 DuplicateTool
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let entry = RegisteredTool::from_tool(tool)?;
        if self.tools.contains_key(&entry.name) {
            return Err(RegistryError::DuplicateTool(entry.name));
        }
        self.tools.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// 显式覆盖已注册的同名工具（后写者生效）
    pub fn register_override(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let entry = RegisteredTool::from_tool(tool)?;
        if self.tools.contains_key(&entry.name) {
            tracing::warn!(tool = %entry.name, "Overriding registered tool");
        }
        self.tools.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 全部工具的 {name, description, parameters, category}，按名称排序
    pub fn describe(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
                category: t.category.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.describe()).unwrap_or_else(|_| "[]".to_string())
    }

    /// 只检查必填参数是否存在（且非 null），不做类型校验
    pub fn validate_params(&self, name: &str, params: &Value) -> Result<(), RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::ToolNotFound(name.to_string()))?;
        for parameter in tool.required_parameters() {
            let present = params
                .get(&parameter)
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                return Err(RegistryError::MissingParameter {
                    tool: name.to_string(),
                    parameter,
                });
            }
        }
        Ok(())
    }
}
