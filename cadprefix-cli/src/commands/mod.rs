pub mod analyze;
pub mod config;
pub mod rename;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use cadprefix::OutputFormat;

/// Spinner on stderr, hidden when the output is meant for machines
pub(crate) fn spinner(format: OutputFormat, message: String) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
