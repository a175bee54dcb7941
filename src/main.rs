//! marge - merge bot for GitLab

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;

use cli::Cli;
use cli::context::BotContext;
use cli::merge::run_bot;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "marge=debug" } else { "marge=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = cli.into_settings().context("invalid configuration")?;
    let ctx = BotContext::new(settings)
        .await
        .context("failed to connect to GitLab")?;
    run_bot(&ctx).await?;
    Ok(())
}
