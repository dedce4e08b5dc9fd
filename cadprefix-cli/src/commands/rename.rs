use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use cadprefix::host::{connector_for, LocalFs};
use cadprefix::{rename_by_prefix, EngineConfig, OutputFormat, OutputWriter, Session};

pub async fn run(
    root: PathBuf,
    from: String,
    to: String,
    config: EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    let connector = connector_for(&config.host)?;
    let spinner = super::spinner(
        format,
        format!("Renaming {} -> {} under {}...", from, to, root.display()),
    );
    let start = Instant::now();

    let campaign_root = root.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let session = Session::from_boxed(connector);
        rename_by_prefix(&session, &LocalFs, &config, &campaign_root, &from, &to)
    })
    .await
    .context("Rename task did not complete")?;

    match outcome {
        Ok(result) => {
            spinner.finish_with_message("Rename complete!");
            info!("Campaign finished in {:?}", start.elapsed());
            OutputWriter::new(format).write_campaign(&result)?;
            Ok(())
        }
        Err(e) => {
            spinner.finish_with_message("Rename failed!");
            Err(e).with_context(|| format!("Failed to rename documents under {}", root.display()))
        }
    }
}
