use anyhow::Result;
use std::fmt::Write as _;

use crate::core::config::EngineConfig;
use crate::engine::{relative_display, CampaignResult, DryRunReport, EntryStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
}

pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn write_campaign(&self, result: &CampaignResult) -> Result<()> {
        println!("{}", self.render_campaign(result)?);
        Ok(())
    }

    pub fn write_dry_run(&self, report: &DryRunReport) -> Result<()> {
        println!("{}", self.render_dry_run(report)?);
        Ok(())
    }

    pub fn write_config(&self, config: &EngineConfig) -> Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Text => println!("{:#?}", config),
            OutputFormat::Markdown => {
                println!("# Effective configuration\n");
                println!("```json\n{}\n```", serde_json::to_string_pretty(config)?);
            }
        }
        Ok(())
    }

    pub fn render_campaign(&self, result: &CampaignResult) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result)?,
            OutputFormat::Text => result.format_summary(),
            OutputFormat::Markdown => campaign_markdown(result),
        })
    }

    pub fn render_dry_run(&self, report: &DryRunReport) -> Result<String> {
        Ok(match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)?,
            OutputFormat::Text => report.format_summary(),
            OutputFormat::Markdown => dry_run_markdown(report),
        })
    }
}

fn campaign_markdown(result: &CampaignResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Prefix rename\n");
    let _ = writeln!(out, "| | |\n|---|---|");
    let _ = writeln!(out, "| Renamed | {} |", result.renamed_count);
    let _ = writeln!(out, "| Failed | {} |", result.failed_count);
    let _ = writeln!(out, "| Skipped | {} |", result.skipped_count);
    let _ = writeln!(out, "| References repaired | {} |", result.references_repaired);
    let _ = writeln!(out, "| Derived links recreated | {} |", result.derived_links_repaired);

    if !result.entries.is_empty() {
        let _ = writeln!(out, "\n## Files\n");
        let _ = writeln!(out, "| Old | New | Status |\n|---|---|---|");
        for entry in &result.entries {
            let status = match &entry.status {
                EntryStatus::Renamed => "renamed".to_string(),
                EntryStatus::Copied => "copied".to_string(),
                EntryStatus::SkippedTargetExists => "skipped: target exists".to_string(),
                EntryStatus::SkippedSourceMissing => "skipped: source missing".to_string(),
                EntryStatus::Failed(reason) => format!("failed: {}", reason),
            };
            let _ = writeln!(
                out,
                "| `{}` | `{}` | {} |",
                relative_display(&entry.old_path, &result.root),
                relative_display(&entry.new_path, &result.root),
                status
            );
        }
    }

    if !result.files_to_delete.is_empty() {
        let _ = writeln!(out, "\n## Superseded originals\n");
        for path in &result.files_to_delete {
            let _ = writeln!(out, "- `{}`", relative_display(path, &result.root));
        }
    }

    write_warnings(&mut out, &result.warnings);
    out
}

fn dry_run_markdown(report: &DryRunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Prefix rename (dry run)\n");
    let _ = writeln!(out, "- Assemblies found: {}", report.assemblies_found);
    let _ = writeln!(out, "- Drawings found: {}", report.drawings_found);
    let _ = writeln!(out, "- Files to rename: {}", report.files_to_rename);
    let _ = writeln!(out, "- Content center files: {}", report.content_center_files);

    if !report.files_skipped.is_empty() {
        let _ = writeln!(out, "\n## Skipped\n");
        for (reason, count) in &report.files_skipped {
            let _ = writeln!(out, "- {}: {}", reason.as_str(), count);
        }
    }

    if !report.planned.is_empty() {
        let _ = writeln!(out, "\n## Planned renames\n");
        for entry in &report.planned {
            let _ = writeln!(
                out,
                "- `{}` → `{}`",
                relative_display(&entry.old_path, &report.root),
                relative_display(&entry.new_path, &report.root)
            );
        }
    }

    write_warnings(&mut out, &report.warnings);
    out
}

fn write_warnings(out: &mut String, warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n## Warnings\n");
    for warning in warnings {
        let _ = writeln!(out, "- {}", warning);
    }
}
