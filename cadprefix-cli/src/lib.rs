//! Prefix rename and reference repair for trees of CAD documents.
//!
//! A campaign renames every part, assembly and drawing whose part number
//! carries an old project code so that its file name carries the new one,
//! then repairs every assembly occurrence, drawing view and derived-part link
//! that pointed at the old files.

pub mod core;
pub mod engine;
pub mod host;

pub use crate::core::{CampaignError, EngineConfig, HostError, OutputFormat, OutputWriter};
pub use engine::{analyze_rename_dry_run, rename_by_prefix, CampaignResult, DryRunReport, Session};
