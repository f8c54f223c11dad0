//! Firefly relay - main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use firefly_relay::cli::{Cli, Command, LogFormat, run_command};
use firefly_relay::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("firefly_relay=info,tower_http=info"));

    // Logs go to stderr so `generate` and `status` can print JSON on stdout.
    let registry = tracing_subscriber::registry().with(env_filter);
    match cli.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init(),
    }

    let config = Config::from_env()?;
    tracing::debug!(token_url = %config.provider.token_url, "Loaded provider configuration");

    let command = cli.command.unwrap_or(Command::Serve {
        bind: None,
        mode: None,
    });
    run_command(command, config).await
}
