use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repomirror::credentials::EnvCredentialSource;
use repomirror::{config, CodeCommitEvent, Mirror};

#[derive(Parser)]
#[command(name = "repomirror")]
#[command(version, about = "Mirror a CodeCommit repository's publish directory into an S3 bucket", long_about = None)]
struct Cli {
    /// Event JSON file; read from stdin when omitted or "-"
    event: Option<String>,

    /// Config file path; environment variables when omitted
    #[arg(long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Uploads run concurrently; clone and discovery use the blocking pool
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

fn read_event(path: Option<&str>) -> Result<Vec<u8>> {
    match path {
        Some(path) if path != "-" => {
            std::fs::read(path).context(format!("Failed to read event file: {:?}", path))
        }
        _ => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read event from stdin")?;
            Ok(buf)
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref())?;

    let raw = read_event(cli.event.as_deref())?;
    let event = CodeCommitEvent::from_json(&raw)?;

    let mirror = Mirror::from_config(config, Arc::new(EnvCredentialSource))?;
    let report = mirror.handle_event(&event).await?;

    println!(
        "mirrored {} to s3://{}: {} deleted, {} uploaded ({} bytes)",
        report.repository,
        mirror.config().bucket,
        report.deleted,
        report.uploaded,
        report.bytes
    );

    Ok(())
}
