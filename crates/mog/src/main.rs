mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use config::AppConfig;

#[derive(Parser)]
#[command(name = "mog", about = "Deletes unreacted channel messages after a TTL")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long, env = "CONFIG", default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    /// Bot token; overrides `token` from the config file.
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Validate the config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config, cli.token)?;

    if cli.check {
        eprintln!(
            "config ok: channel {} ttl {:?} snapshot {}",
            config.boom_message.channel_id,
            config.boom_message.dead_after,
            config.boom_message.snapshot_path().display()
        );
        return Ok(());
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "mog starting");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            cancel.cancel();
        }
    });

    app::run(config, cancel).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = term => {}
    }
}
