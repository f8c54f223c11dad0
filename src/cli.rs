//! CLI command handling.
//!
//! Provides subcommands for:
//! - Running the HTTP relay (`serve`)
//! - Running one generation from the terminal (`generate`)
//! - Querying a job status URL once (`status`)

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::config::{Config, ResponseMode};
use crate::orchestrator::Orchestrator;
use crate::progress::SharedProgress;
use crate::request::{GenerateBody, StatusQueryBody};
use crate::server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "firefly-relay")]
#[command(about = "Relay generation requests to the Firefly APIs and wait for the result")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Log output format
    #[arg(
        long,
        global = true,
        env = "RELAY_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP relay (default if no subcommand given)
    Serve {
        /// Address to bind (overrides RELAY_BIND_ADDR)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// `wait` for the result or answer `accepted` right after submission
        #[arg(long)]
        mode: Option<ResponseMode>,
    },

    /// Run one generation and print the JSON response body
    Generate {
        /// Job kind: video, image, avatar or audio
        #[arg(long = "type")]
        kind: String,

        /// Prompt, or script text for avatars
        #[arg(long)]
        prompt: String,

        #[arg(long)]
        width: Option<i64>,

        #[arg(long)]
        height: Option<i64>,

        #[arg(long)]
        voice_id: Option<String>,

        #[arg(long)]
        avatar_id: Option<String>,
    },

    /// Query a job status URL once
    Status {
        /// Status URL returned by an accepted submission
        #[arg(long)]
        url: String,

        /// Job kind the URL belongs to
        #[arg(long = "type")]
        kind: String,
    },
}

/// Dispatch a parsed command.
pub async fn run_command(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Serve { bind, mode } => run_serve(config, bind, mode).await,
        Command::Generate {
            kind,
            prompt,
            width,
            height,
            voice_id,
            avatar_id,
        } => {
            let body = GenerateBody {
                api_type: Some(kind),
                prompt: Some(prompt),
                width,
                height,
                voice_id,
                avatar_id,
            };
            run_generate(config, body).await
        }
        Command::Status { url, kind } => {
            let body = StatusQueryBody {
                status_url: Some(url),
                api_type: Some(kind),
            };
            run_status(config, body).await
        }
    }
}

async fn run_serve(
    mut config: Config,
    bind: Option<SocketAddr>,
    mode: Option<ResponseMode>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.server.bind_addr = bind;
    }
    if let Some(mode) = mode {
        config.server.mode = mode;
    }

    let orchestrator = Orchestrator::from_config(&config, Arc::new(SharedProgress::new()));
    let state = AppState::new(Arc::new(orchestrator), config.server.orchestration_budget);
    let mut server = RelayServer::new(config.server.bind_addr, state);
    server.start().await?;

    tracing::info!(
        mode = ?config.server.mode,
        max_attempts = config.poll.max_attempts(),
        delay_ms = config.poll.delay().as_millis() as u64,
        max_wait_secs = config.poll.total_wait().as_secs(),
        "Relay ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    server.shutdown().await;
    Ok(())
}

async fn run_generate(config: Config, body: GenerateBody) -> anyhow::Result<()> {
    // The terminal always waits for the result.
    let orchestrator = Orchestrator::from_config(&config, Arc::new(SharedProgress::new()))
        .with_mode(ResponseMode::Wait);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let outcome = orchestrator.run(body, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&outcome.to_body())?);

    let status = outcome.status_code();
    if !status.is_success() {
        anyhow::bail!("generation ended with HTTP {}", status);
    }
    Ok(())
}

async fn run_status(config: Config, body: StatusQueryBody) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(&config, Arc::new(SharedProgress::new()));
    let report = orchestrator.check_status(body).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
