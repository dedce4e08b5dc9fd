use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cadprefix::core::config::TransferMode;
use cadprefix::{EngineConfig, OutputFormat};

mod commands;

#[derive(Parser)]
#[command(name = "cadprefix")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Prefix rename and reference repair for CAD document trees",
    long_about = "Renames parts, assemblies and drawings whose part number carries an old \
                  project code so their file names carry a new one, then repairs every \
                  occurrence, drawing view and derived-part link that referenced them."
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (json, text, markdown)
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file layered over the user and project configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename documents from one prefix to another and repair their references
    Rename {
        /// Directory to search for assemblies, or a single root assembly
        root: PathBuf,

        /// Prefix currently carried by the part numbers (e.g. ABC)
        #[arg(long)]
        from: String,

        /// Prefix the file names should carry (e.g. XYZ)
        #[arg(long)]
        to: String,

        /// Copy to the new names and report the originals for deletion
        #[arg(long)]
        copy: bool,

        /// Also rewrite part numbers to carry the new prefix
        #[arg(long)]
        update_part_numbers: bool,
    },

    /// Report what a rename would do, without changing anything
    Analyze {
        /// Directory to search for assemblies, or a single root assembly
        root: PathBuf,

        /// Prefix the file names should carry
        #[arg(long)]
        to: String,

        /// Only consider part numbers starting with this prefix
        #[arg(long)]
        from: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("cadprefix=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("cadprefix=info")
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Rename {
            root,
            from,
            to,
            copy,
            update_part_numbers,
        } => {
            if copy {
                config.transfer = TransferMode::Copy;
            }
            config.update_part_numbers |= update_part_numbers;
            commands::rename::run(root, from, to, config, cli.format).await?
        }
        Commands::Analyze { root, to, from } => {
            commands::analyze::run(root, from, to, config, cli.format).await?
        }
        Commands::Config => commands::config::run(&config, cli.format).await?,
    }

    Ok(())
}
