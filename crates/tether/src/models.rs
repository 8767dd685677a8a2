//! These models represent the objects passed around by the engine
//!
//! There are a few related formats we need to interact with:
//! - conversation turns kept per user and sent to the model as context
//! - anthropic messages/tools, sent from the engine to the LLM
//! - MCP tool definitions and call results, exchanged with the tool server
//! - output chunks, streamed from the engine to the transport adapter
//!
//! We always immediately convert those wire formats into the internal structs,
//! so the internal models are not an exact match to any of them.
pub mod chunk;
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
