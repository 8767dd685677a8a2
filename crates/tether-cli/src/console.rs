//! Console transport.
//!
//! Stands in for a chat network: every stdin line is one inbound message and
//! every reply is printed as its own outbound message. Lines starting with
//! `@name` come from user `name`, so several conversations can be exercised
//! from one terminal.

use anyhow::Result;
use console::style;
use futures::StreamExt;
use std::sync::Arc;
use tether::agent::Agent;
use tether::models::chunk::{ChunkKind, OutputChunk};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::configuration::TransportSettings;

pub const RESET_COMMAND: &str = "/reset";
const APOLOGY: &str = "Sorry, something went wrong.";
const RESET_CONFIRMATION: &str = "Conversation cleared.";
const RESULT_PREFIX: &str = "Result: ";

#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Query { user_id: String, text: String },
    Reset { user_id: String },
    Blank,
}

/// Work out who a line is from and what they want
pub fn parse_line(line: &str, default_user: &str) -> Inbound {
    let line = line.trim();
    if line.is_empty() {
        return Inbound::Blank;
    }

    let (user_id, text) = match line.strip_prefix('@') {
        Some(addressed) => {
            let (user, text) = addressed
                .split_once(char::is_whitespace)
                .unwrap_or((addressed, ""));
            let user = if user.is_empty() { default_user } else { user };
            (user.to_string(), text.trim().to_string())
        }
        None => (default_user.to_string(), line.to_string()),
    };

    if text == RESET_COMMAND {
        Inbound::Reset { user_id }
    } else {
        Inbound::Query { user_id, text }
    }
}

/// Text of the outbound message for one chunk, cut to the channel's limit
pub fn present(chunk: &OutputChunk, max_chars: usize) -> String {
    let text = match chunk.kind {
        ChunkKind::ToolResult => format!("{}{}", RESULT_PREFIX, chunk.content),
        ChunkKind::Text | ChunkKind::ToolStart => chunk.content.clone(),
    };
    truncate(&text, max_chars)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

/// One message ready to be shown to a user
#[derive(Debug)]
struct Outbound {
    user_id: String,
    kind: Option<ChunkKind>,
    text: String,
}

impl Outbound {
    fn notice(user_id: &str, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: None,
            text: text.to_string(),
        }
    }
}

/// Read messages from `input` until it ends or the process is interrupted
pub async fn run<R>(agent: Arc<Agent>, input: R, settings: TransportSettings) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let settings = Arc::new(settings);
    let (tx, rx) = mpsc::channel::<Outbound>(100);
    let writer = tokio::spawn(write_messages(rx));

    let mut queries = JoinSet::new();
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                queries.abort_all();
                break;
            }
        };
        let Some(line) = line else {
            info!("input closed, waiting for replies in flight");
            break;
        };

        match parse_line(&line, &settings.user_id) {
            Inbound::Blank => {}
            Inbound::Reset { user_id } => {
                agent.clear_history(&user_id).await;
                let _ = tx.send(Outbound::notice(&user_id, RESET_CONFIRMATION)).await;
            }
            Inbound::Query { user_id, text } => {
                info!(user_id = %user_id, "received: {}", text);
                queries.spawn(answer(
                    agent.clone(),
                    settings.clone(),
                    tx.clone(),
                    user_id,
                    text,
                ));
            }
        }
    }

    while queries.join_next().await.is_some() {}
    drop(tx);
    writer.await?;
    Ok(())
}

/// Stream one query's reply into the outbound channel
async fn answer(
    agent: Arc<Agent>,
    settings: Arc<TransportSettings>,
    tx: mpsc::Sender<Outbound>,
    user_id: String,
    text: String,
) {
    let mut chunks = match agent.stream_query(&text, &user_id).await {
        Ok(chunks) => chunks,
        Err(e) => {
            error!(user_id = %user_id, "query rejected: {}", e);
            let _ = tx.send(Outbound::notice(&user_id, APOLOGY)).await;
            return;
        }
    };

    while let Some(chunk) = chunks.next().await {
        let outbound = Outbound {
            user_id: user_id.clone(),
            kind: Some(chunk.kind),
            text: present(&chunk, settings.max_message_chars),
        };
        if tx.send(outbound).await.is_err() {
            error!("Error sending reply through channel: writer stopped");
            return;
        }
        tokio::time::sleep(settings.chunk_delay()).await;
    }
    info!(user_id = %user_id, "replies sent");
}

async fn write_messages(rx: mpsc::Receiver<Outbound>) {
    let mut messages = ReceiverStream::new(rx);
    while let Some(message) = messages.next().await {
        let text = match message.kind {
            Some(ChunkKind::ToolStart) => style(message.text).dim().to_string(),
            Some(ChunkKind::ToolResult) => style(message.text).cyan().to_string(),
            Some(ChunkKind::Text) => message.text,
            None => style(message.text).yellow().to_string(),
        };
        println!("{} {}", style(format!("[{}]", message.user_id)).bold(), text);
    }
}
