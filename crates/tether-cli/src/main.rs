use anyhow::{bail, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tether::agent::Agent;
use tether::providers::anthropic::AnthropicProvider;
use tether::tools::mcp::{McpClient, ServerCommand};
use tether::tools::ToolConnection;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod configuration;
mod console;
mod error;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the tool server script (.js or .py)
    #[arg(required_unless_present = "command")]
    server_script: Option<String>,

    /// Launch the tool server with this program and arguments instead
    #[arg(long, num_args = 1.., allow_hyphen_values = true, conflicts_with = "server_script")]
    command: Option<Vec<String>>,

    /// Settings file, layered under the TETHER_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn server_command(&self) -> Result<ServerCommand> {
        match (&self.command, &self.server_script) {
            (Some(command), _) => match command.split_first() {
                Some((program, args)) => Ok(ServerCommand::new(program.clone(), args.to_vec())),
                None => bail!("--command needs a program to run"),
            },
            (None, Some(script)) => Ok(ServerCommand::for_script(script)?),
            (None, None) => bail!("a tool server script or --command is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr so they never mix with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tether=info,tether_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::new(cli.config.as_deref())?;
    let server = cli.server_command()?;
    let provider = AnthropicProvider::new(settings.provider.into_config())?;

    let client = Arc::new(McpClient::spawn(&server, settings.engine.tool_timeout()).await?);
    let agent = match Agent::new(
        Box::new(provider),
        client.clone(),
        settings.engine.agent_config(),
    )
    .await
    {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            client.close().await;
            return Err(e.into());
        }
    };

    info!("ready, type a message (\"@name text\" to speak as someone else, /reset to start over)");
    let stdin = BufReader::new(tokio::io::stdin());
    let result = console::run(agent, stdin, settings.transport).await;

    client.close().await;
    result
}
