use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::connection::ToolConnection;
use super::error::{ToolError, ToolResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A tool connection with canned results per tool name that records every call
#[derive(Default)]
pub struct MockToolConnection {
    tools: Vec<Tool>,
    results: HashMap<String, ToolResult<Vec<Content>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ToolCall>>,
}

impl MockToolConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool that answers with `result`
    pub fn with_tool(mut self, name: &str, result: ToolResult<Vec<Content>>) -> Self {
        self.tools.push(Tool::new(
            name,
            format!("mock tool {}", name),
            json!({"type": "object", "properties": {}}),
        ));
        self.results.insert(name.to_string(), result);
        self
    }

    /// Register a tool that answers with a single text item
    pub fn with_text_tool(self, name: &str, text: &str) -> Self {
        self.with_tool(name, Ok(vec![Content::text(text)]))
    }

    /// Register a tool whose every call fails
    pub fn with_failing_tool(self, name: &str) -> Self {
        self.with_tool(name, Err(ToolError::ExecutionError(format!("{} exploded", name))))
    }

    /// Make every call take `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolConnection for MockToolConnection {
    async fn list_tools(&self) -> ToolResult<Vec<Tool>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool_call: ToolCall) -> ToolResult<Vec<Content>> {
        self.calls.lock().unwrap().push(tool_call.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.results
            .get(&tool_call.name)
            .cloned()
            .unwrap_or_else(|| Err(ToolError::NotFound(tool_call.name)))
    }
}
