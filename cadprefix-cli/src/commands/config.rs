use anyhow::Result;

use cadprefix::{EngineConfig, OutputFormat, OutputWriter};

pub async fn run(config: &EngineConfig, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Text {
        if let Some(path) = EngineConfig::user_config_path() {
            println!("User configuration: {}", path.display());
        }
    }
    OutputWriter::new(format).write_config(config)
}
