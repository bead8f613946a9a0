//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Every option is optional so that values from
//! `.accessreview.toml` are only overridden when given explicitly.

use clap::Parser;
use std::path::PathBuf;

/// AccessReview - scheduled cloud access review
///
/// Collects security posture evidence from read-only provider exports,
/// writes a CSV evidence record and a governance narrative summarized by a
/// local model, with a deterministic fallback when the model is unavailable.
///
/// Examples:
///   accessreview --snapshot-dir ./snapshots
///   accessreview --snapshot-dir ./snapshots --model qwen2.5:14b
///   accessreview --config /etc/accessreview.toml --no-model
///   accessreview --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .accessreview.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory with one <source>.json provider export per source
    #[arg(short, long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Directory the CSV artifact is written to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Account or scope label for the review
    #[arg(short, long, value_name = "LABEL")]
    pub account: Option<String>,

    /// Ollama model used for the narrative
    #[arg(short, long, env = "ACCESSREVIEW_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Model call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the model call and use the deterministic narrative
    #[arg(long)]
    pub no_model: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .accessreview.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref dir) = self.snapshot_dir {
            if !dir.is_dir() {
                return Err(format!(
                    "Snapshot directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
