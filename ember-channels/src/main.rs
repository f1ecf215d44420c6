//! Ember - Telegram LLM chat assistant.

use anyhow::Result;
use ember_common::config::Config;
use ember_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_with_env()?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Ember v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    let (channel, router) = ember_channels::build(&config)?;
    tracing::info!(model = %config.llm.model, max_rounds = config.session.max_rounds, "Bot ready");

    tokio::select! {
        result = ember_channels::serve(channel, router) => result?,
        signal = shutdown_signal() => {
            signal?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
