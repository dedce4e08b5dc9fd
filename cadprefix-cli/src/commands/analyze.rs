use anyhow::{Context, Result};
use std::path::PathBuf;

use cadprefix::host::connector_for;
use cadprefix::{analyze_rename_dry_run, EngineConfig, OutputFormat, OutputWriter, Session};

pub async fn run(
    root: PathBuf,
    from: Option<String>,
    to: String,
    config: EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    let connector = connector_for(&config.host)?;
    let spinner = super::spinner(format, format!("Analyzing {}...", root.display()));

    let analysis_root = root.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let session = Session::from_boxed(connector);
        analyze_rename_dry_run(&session, &config, &analysis_root, from.as_deref(), &to)
    })
    .await
    .context("Analysis task did not complete")?;

    match outcome {
        Ok(report) => {
            spinner.finish_with_message("Analysis complete!");
            OutputWriter::new(format).write_dry_run(&report)?;
            Ok(())
        }
        Err(e) => {
            spinner.finish_with_message("Analysis failed!");
            Err(e).with_context(|| format!("Failed to analyze documents under {}", root.display()))
        }
    }
}
