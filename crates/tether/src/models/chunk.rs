use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// What an output chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChunkKind {
    /// Assistant text, or a user-safe error message
    Text,
    /// A tool invocation is starting
    ToolStart,
    /// The text the model produced after consuming a tool result
    ToolResult,
}

/// The unit streamed from the agent to the transport adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub kind: ChunkKind,
    pub content: String,
}

impl OutputChunk {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            kind: ChunkKind::Text,
            content: content.into(),
        }
    }

    pub fn tool_start(tool_name: &str) -> Self {
        Self {
            kind: ChunkKind::ToolStart,
            content: format!("invoking {}", tool_name),
        }
    }

    pub fn tool_result<S: Into<String>>(content: S) -> Self {
        Self {
            kind: ChunkKind::ToolResult,
            content: content.into(),
        }
    }
}
