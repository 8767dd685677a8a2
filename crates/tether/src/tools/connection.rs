use async_trait::async_trait;

use super::error::ToolResult;
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A connection to something that can list tools and invoke them by name
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Get the tools the connection offers
    async fn list_tools(&self) -> ToolResult<Vec<Tool>>;

    /// Call a tool, returning the items of its result
    async fn call_tool(&self, tool_call: ToolCall) -> ToolResult<Vec<Content>>;

    /// Release the connection. Errors are logged, not returned.
    async fn close(&self) {}
}
