mod cli;

use crate::cli::{Command, LogFormat, CLI};
use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tinylink_shortener::{
    BatchItem, DeletionDispatcher, DispatcherConfig, Shortener, ShortenerService,
};
use tinylink_storage::Closer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(
        storage_backend = %config.storage,
        base_url = %config.base_url,
        owner = %config.owner,
        "starting tinylink"
    );

    let repository = Arc::new(
        tinylink_storage::open(&config.storage_config()?)
            .await
            .context("failed to open storage")?,
    );
    let service = ShortenerService::with_shared(Arc::clone(&repository), config.shortener_config());

    let outcome = run(
        Arc::new(service),
        &config.owner,
        config.command,
        &mut std::io::stdout(),
    )
    .await;
    let closed = repository.close().await.context("failed to close storage");
    finish(outcome, closed)
}

/// Reports the command's own failure ahead of a failure to close storage.
fn finish(outcome: anyhow::Result<()>, closed: anyhow::Result<()>) -> anyhow::Result<()> {
    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            error!(error = %close_err, "failed to close storage after command error");
            Err(e)
        }
        (outcome, closed) => outcome.and(closed),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run<W: Write + Send>(
    service: Arc<dyn Shortener>,
    owner: &str,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()> {
    match command {
        Command::Shorten { mut urls } if urls.len() == 1 => {
            let url = urls.remove(0);
            let shortened = service.shorten_url(owner, &url).await?;
            if shortened.already_existed {
                writeln!(out, "{} (existing)", shortened.short_url)?;
            } else {
                writeln!(out, "{}", shortened.short_url)?;
            }
        }
        Command::Shorten { urls } => {
            let items = urls
                .into_iter()
                .enumerate()
                .map(|(i, original_url)| BatchItem {
                    correlation_id: i.to_string(),
                    original_url,
                })
                .collect();
            for result in service.shorten_batch(owner, items).await? {
                writeln!(out, "{}", result.short_url)?;
            }
        }
        Command::Expand { code } => {
            writeln!(out, "{}", service.expand_url(&code).await?)?;
        }
        Command::List => {
            for listed in service.get_all(owner).await? {
                writeln!(out, "{}\t{}", listed.short_url, listed.original_url)?;
            }
        }
        Command::Delete { codes } => {
            let dispatcher = DeletionDispatcher::new(service, DispatcherConfig::default());
            dispatcher.dispatch(owner, codes);
            writeln!(out, "accepted")?;
            out.flush()?;
            dispatcher.shutdown().await;
        }
        Command::Stats => {
            let stats = service.stats().await?;
            writeln!(out, "urls: {}", stats.url_count)?;
            writeln!(out, "users: {}", stats.owner_count)?;
        }
        Command::Ping => {
            service.ping_storage().await?;
            writeln!(out, "ok")?;
        }
    }

    Ok(())
}
