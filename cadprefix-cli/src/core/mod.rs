pub mod config;
pub mod error;
pub mod output;
pub mod retry;
pub mod types;

pub use config::EngineConfig;
pub use error::{CampaignError, HostError, HostResult, RepairError};
pub use output::{OutputFormat, OutputWriter};
pub use retry::RetryPolicy;
pub use types::*;
