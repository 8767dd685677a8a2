pub mod connection;
pub mod error;
pub mod mcp;

#[cfg(test)]
pub mod mock;

pub use connection::ToolConnection;
pub use error::{ToolError, ToolResult};
