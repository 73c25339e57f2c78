use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub mod args;
pub mod config;
pub mod console;
pub mod destination;
pub mod events;
pub mod item;
pub mod transport;
pub mod upload;

pub use config::{ConfigError, FeatureToggles, UploadConfig, UploadOptions};
pub use events::{FixedAnswer, OverwritePrompt, SilentEvents, UploadEvents};
pub use item::{DisplayState, FileHandle, ServerResponse, UploadItem, UploadStatus};
pub use transport::{
    HttpTransport, ProgressReporter, TransportError, UploadRequest, UploadTransport,
};
pub use upload::{QueueError, QueueStatus, UploadQueueManager};

use args::{Cli, OverwriteMode};
use console::{ConsoleReporter, StdinPrompt};

/// Builds the effective configuration: file first, then command-line overrides.
pub fn build_config(cli: &Cli) -> Result<UploadConfig> {
    let mut config = match &cli.config {
        Some(path) => UploadConfig::load(path)?,
        None => UploadConfig::default(),
    };

    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(destination) = &cli.destination {
        config.destination = destination.clone();
    }
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent_uploads = max;
    }
    if cli.extract {
        config.features.show_extract_option = true;
        config.options.extract = true;
    }
    if cli.send_email {
        config.features.show_email_option = true;
        config.options.send_email = true;
    }
    match cli.overwrite {
        OverwriteMode::Always => config.options.overwrite = true,
        OverwriteMode::Ask | OverwriteMode::Never => {}
    }

    config.validate()?;
    Ok(config)
}

/// Uploads the files named on the command line. Returns whether every file
/// made it to the server.
pub async fn run(cli: Cli) -> Result<bool> {
    let config = build_config(&cli)?;

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let handle = FileHandle::from_path(path)
            .await
            .with_context(|| format!("Failed to open '{}'", path.display()))?;
        files.push(handle);
    }

    let transport = HttpTransport::new(config.request_timeout_secs.map(Duration::from_secs))?;
    let events: Arc<dyn UploadEvents> =
        Arc::new(ConsoleReporter::new(config.mount_point.clone()));
    let prompt: Arc<dyn OverwritePrompt> = match cli.overwrite {
        OverwriteMode::Ask => Arc::new(StdinPrompt),
        OverwriteMode::Always => Arc::new(FixedAnswer(true)),
        OverwriteMode::Never => Arc::new(FixedAnswer(false)),
    };

    let queue = UploadQueueManager::new(config, transport, events, prompt)?;
    if let Some(warning) = queue.concurrency_warning() {
        eprintln!("Warning: {}", warning);
    }

    queue.enqueue(files).await?;

    let status = tokio::select! {
        status = queue.wait_until_settled() => status?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling uploads");
            queue.cancel_all().await?;
            queue.wait_until_settled().await?
        }
    };

    if cli.json {
        let items = queue.items().await?;
        println!("{}", serde_json::to_string_pretty(&items)?);
    }

    info!(
        "Uploads started: {}, ready for processing: {}",
        status.uploads_started, status.ready_for_processing
    );
    queue.close().await?;

    Ok(!status.any_failed_uploads && status.uploads_started == cli.files.len())
}
