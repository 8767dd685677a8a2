use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::history::{ConversationHistory, WorkingHistory};
use crate::models::chunk::OutputChunk;
use crate::models::content::{join_text, Content};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::Provider;
use crate::store::ConversationStore;
use crate::tools::ToolConnection;

/// Returned in place of a tool result once the nesting bound is hit
pub const DEPTH_LIMIT_SENTINEL: &str = "tool depth limit reached";
/// Joins the text items of one tool result into a single user turn
pub const RESULT_SEPARATOR: &str = ", ";

const MODEL_ERROR_MESSAGE: &str =
    "Sorry, something went wrong while processing your message. Please try again.";
const TOOL_RESOLUTION_ERROR_MESSAGE: &str = "Error processing the tool response.";
const CANCELLED_MESSAGE: &str = "Sorry, that took too long to answer. Please try again.";

/// Inline marker left in the output when a tool call fails
pub fn tool_error_marker(tool_name: &str) -> String {
    format!("[tool error: {}]", tool_name)
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Bound on nested tool resolution for a single query
    pub max_tool_depth: usize,
    /// Deadline for a whole query, counted from when the user's lock is taken
    pub query_timeout: Duration,
    pub tool_timeout: Duration,
    /// Messages kept per user; `None` keeps everything. Anything below 2
    /// cannot hold a question with its answer.
    pub history_window: Option<usize>,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: 3,
            query_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(30),
            history_window: Some(100),
            system_prompt: String::new(),
        }
    }
}

/// Agent integrates a foundational LLM with the tools exposed by one tool connection
pub struct Agent {
    provider: Box<dyn Provider>,
    tools: Arc<dyn ToolConnection>,
    catalogue: Vec<Tool>,
    store: ConversationStore,
    config: AgentConfig,
}

impl Agent {
    /// Create an agent, fetching the tool catalogue once.
    ///
    /// Failing to list tools is fatal. Tools whose names the model API would
    /// reject are left out of the catalogue.
    pub async fn new(
        provider: Box<dyn Provider>,
        tools: Arc<dyn ToolConnection>,
        config: AgentConfig,
    ) -> EngineResult<Self> {
        let listed = tools
            .list_tools()
            .await
            .map_err(|e| EngineError::Startup(format!("could not list tools: {}", e)))?;

        let catalogue: Vec<Tool> = listed
            .into_iter()
            .filter(|tool| {
                let valid = tool.has_valid_name();
                if !valid {
                    warn!("skipping tool with invalid name: {:?}", tool.name);
                }
                valid
            })
            .collect();

        info!(
            "available tools: {:?}",
            catalogue.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            provider,
            tools,
            catalogue,
            store: ConversationStore::new(config.history_window),
            config,
        })
    }

    /// The tool catalogue sent with every model call
    pub fn tools(&self) -> &[Tool] {
        &self.catalogue
    }

    /// Snapshot of a user's committed history
    pub async fn history(&self, user_id: &str) -> Vec<Message> {
        self.store.get(user_id).await.messages()
    }

    /// Forget everything said with a user
    pub async fn clear_history(&self, user_id: &str) {
        self.store.clear(user_id).await;
        info!(user_id, "history cleared");
    }

    /// Answer `query` on behalf of `user_id` as a stream of output chunks.
    ///
    /// Empty arguments are rejected here, before anything is touched. Every
    /// later failure ends the stream with a user-safe chunk instead. Queries
    /// for the same user run one at a time; dropping the stream abandons the
    /// query and keeps only what was already committed.
    pub async fn stream_query(
        &self,
        query: &str,
        user_id: &str,
    ) -> EngineResult<BoxStream<'_, OutputChunk>> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidArgument("query must not be empty".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(EngineError::InvalidArgument("user id must not be empty".to_string()));
        }

        let query = query.to_string();
        let user_id = user_id.to_string();

        Ok(Box::pin(async_stream::stream! {
            let mut history = self.store.lock(&user_id).await;
            let deadline = Instant::now() + self.config.query_timeout;
            debug!(user_id = %user_id, "processing query");

            // The user turn only becomes canonical once the model answered
            let mut working = history.fork();
            working.push(Message::user().with_text(query));
            let response = match self.complete(working.messages(), deadline).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(user_id = %user_id, "query failed: {}", e);
                    yield OutputChunk::text(user_message(&e));
                    return;
                }
            };
            if let Err(e) = commit(&mut history, working) {
                warn!(user_id = %user_id, "could not commit query: {}", e);
                yield OutputChunk::text(user_message(&e));
                return;
            }

            for block in response.content {
                match block {
                    MessageContent::Text(text) => {
                        history.append(Message::assistant().with_text(text.clone()));
                        yield OutputChunk::text(text);
                    }
                    MessageContent::ToolRequest(request) => {
                        let name = request.tool_call.name.clone();
                        yield OutputChunk::tool_start(&name);

                        if !self.within_depth(1) {
                            yield OutputChunk::tool_result(DEPTH_LIMIT_SENTINEL);
                            continue;
                        }

                        let content = match self.call_tool(request.tool_call, deadline).await {
                            Ok(content) => content,
                            Err(EngineError::Cancelled(reason)) => {
                                warn!(user_id = %user_id, "query cancelled: {}", reason);
                                yield OutputChunk::text(CANCELLED_MESSAGE);
                                return;
                            }
                            Err(e) => {
                                warn!(user_id = %user_id, "{}", e);
                                yield OutputChunk::tool_result(tool_error_marker(&name));
                                continue;
                            }
                        };

                        let mut scratch = history.fork();
                        scratch.push(tool_result_turn(&content));
                        let resolved = match self.resolve(&mut scratch, 1, deadline).await {
                            Ok(text) => commit(&mut history, scratch).map(|added| (text, added)),
                            Err(e) => Err(e),
                        };
                        match resolved {
                            Ok((text, added)) => {
                                debug!(user_id = %user_id, tool = %name, added, "tool resolution committed");
                                yield OutputChunk::tool_result(text);
                            }
                            Err(EngineError::Cancelled(reason)) => {
                                warn!(user_id = %user_id, "query cancelled: {}", reason);
                                yield OutputChunk::text(CANCELLED_MESSAGE);
                                return;
                            }
                            Err(e) => {
                                warn!(user_id = %user_id, tool = %name, "tool resolution failed: {}", e);
                                yield OutputChunk::tool_result(TOOL_RESOLUTION_ERROR_MESSAGE);
                            }
                        }
                    }
                }
            }
        }))
    }

    /// Drive the model until it stops asking for tools, appending every turn to
    /// `working` and returning the text it produced along the way.
    ///
    /// Tool failures become inline markers. Model failures and cancellation are
    /// returned so the caller can discard `working`.
    fn resolve<'a>(
        &'a self,
        working: &'a mut WorkingHistory,
        depth: usize,
        deadline: Instant,
    ) -> BoxFuture<'a, EngineResult<String>> {
        Box::pin(async move {
            if !self.within_depth(depth) {
                return Ok(DEPTH_LIMIT_SENTINEL.to_string());
            }

            let response = self.complete(working.messages(), deadline).await?;
            let mut result = String::new();

            for block in response.content {
                match block {
                    MessageContent::Text(text) => {
                        working.push(Message::assistant().with_text(text.clone()));
                        result.push_str(&text);
                    }
                    MessageContent::ToolRequest(request) => {
                        let name = request.tool_call.name.clone();
                        if !self.within_depth(depth + 1) {
                            debug!(tool = %name, depth, "not invoking tool past the depth limit");
                            result.push_str(DEPTH_LIMIT_SENTINEL);
                            continue;
                        }

                        match self.call_tool(request.tool_call, deadline).await {
                            Ok(content) => {
                                working.push(tool_result_turn(&content));
                                let nested = self.resolve(working, depth + 1, deadline).await?;
                                result.push_str(&nested);
                            }
                            Err(EngineError::ToolInvocation { name, reason }) => {
                                warn!(tool = %name, depth, "tool call failed: {}", reason);
                                result.push_str(&tool_error_marker(&name));
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
            }

            Ok(result)
        })
    }

    /// A tool call's resolution nests at `depth`; it may run only below the bound
    fn within_depth(&self, depth: usize) -> bool {
        depth < self.config.max_tool_depth
    }

    async fn complete(&self, messages: &[Message], deadline: Instant) -> EngineResult<Message> {
        let call = self
            .provider
            .complete(&self.config.system_prompt, messages, &self.catalogue);
        match timeout_at(deadline, call).await {
            Ok(Ok((message, usage))) => {
                debug!(
                    input_tokens = ?usage.input_tokens,
                    output_tokens = ?usage.output_tokens,
                    "model call completed"
                );
                Ok(message)
            }
            Ok(Err(e)) => Err(EngineError::ModelCall(e.to_string())),
            Err(_) => Err(EngineError::Cancelled(
                "query deadline passed while waiting for the model".to_string(),
            )),
        }
    }

    /// Invoke a tool, bounded by both the per-tool timeout and the query deadline
    async fn call_tool(&self, tool_call: ToolCall, deadline: Instant) -> EngineResult<Vec<Content>> {
        let name = tool_call.name.clone();
        let tool_deadline = deadline.min(Instant::now() + self.config.tool_timeout);
        debug!(tool = %name, "invoking tool");

        match timeout_at(tool_deadline, self.tools.call_tool(tool_call)).await {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(EngineError::ToolInvocation {
                name,
                reason: e.to_string(),
            }),
            Err(_) if Instant::now() >= deadline => Err(EngineError::Cancelled(format!(
                "query deadline passed while waiting for tool '{}'",
                name
            ))),
            Err(_) => Err(EngineError::ToolInvocation {
                name,
                reason: format!("timed out after {:?}", self.config.tool_timeout),
            }),
        }
    }
}

/// Merge a working history back; a diverged fork is dropped whole
fn commit(history: &mut ConversationHistory, working: WorkingHistory) -> EngineResult<usize> {
    Ok(history.merge(working)?)
}

/// Tool output goes back to the model as a user turn
fn tool_result_turn(content: &[Content]) -> Message {
    Message::user().with_text(join_text(content, RESULT_SEPARATOR))
}

fn user_message(err: &EngineError) -> &'static str {
    match err {
        EngineError::Cancelled(_) => CANCELLED_MESSAGE,
        _ => MODEL_ERROR_MESSAGE,
    }
}
