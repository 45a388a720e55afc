//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap. Most
//! options can also come from the environment; values given here take
//! precedence over `.trapchain.toml`.

use clap::Parser;
use std::path::PathBuf;

/// Trapchain - LLM-assisted SOC summaries for honeypot logs
///
/// Pulls honeypot logs from Loki for a recent time window, has a language
/// model classify them chunk by chunk, groups the results by actor and
/// writes a Markdown summary.
///
/// Examples:
///   trapchain
///   trapchain --hours 24 --output reports/daily.md
///   trapchain --loki-url http://loki:3100 --apps cowrie,dionaea,heralding
///   trapchain --format json --output reports/latest.json
///   trapchain --init-config
#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Loki base URL
    #[arg(long, value_name = "URL", env = "LOKI_URL")]
    pub loki_url: Option<String>,

    /// Base URL of the OpenAI-compatible chat API
    #[arg(long, value_name = "URL", env = "OPENAI_BASE_URL")]
    pub openai_url: Option<String>,

    /// API key for the chat API
    #[arg(long, value_name = "KEY", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used for classification and consolidation
    #[arg(short, long, env = "TRAPCHAIN_MODEL")]
    pub model: Option<String>,

    /// Number of log lines sent to the model per request
    ///
    /// Tune for the model's context limit.
    #[arg(long, value_name = "LINES", env = "CHUNK_SIZE")]
    pub chunk_size: Option<usize>,

    /// Length of the time window, ending now
    #[arg(long, value_name = "HOURS", env = "TRAPCHAIN_HOURS")]
    pub hours: Option<u32>,

    /// Output file path for the report
    ///
    /// With --format json and no path given, a configured .md path is
    /// written as .json instead.
    #[arg(short, long, value_name = "FILE", env = "TRAPCHAIN_REPORT")]
    pub output: Option<PathBuf>,

    /// Honeypot app labels to query (comma-separated)
    ///
    /// Example: --apps cowrie,dionaea
    #[arg(long, value_name = "APPS", value_delimiter = ',')]
    pub apps: Option<Vec<String>>,

    /// Loki namespace label of the honeypots
    #[arg(long, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Hard cap on chunks classified in one run
    #[arg(long, value_name = "COUNT")]
    pub max_iterations: Option<usize>,

    /// Temperature for model responses (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds for Loki and the model API
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .trapchain.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Generate a default .trapchain.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

// Hand-written so the API key never lands in logs.
impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("loki_url", &self.loki_url)
            .field("openai_url", &self.openai_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("chunk_size", &self.chunk_size)
            .field("hours", &self.hours)
            .field("output", &self.output)
            .field("apps", &self.apps)
            .field("namespace", &self.namespace)
            .field("max_iterations", &self.max_iterations)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("config", &self.config)
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .field("format", &self.format)
            .finish()
    }
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
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

        for (name, url) in [("Loki", &self.loki_url), ("Model API", &self.openai_url)] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(format!("{} URL must start with 'http://' or 'https://'", name));
                }
            }
        }

        if self.chunk_size == Some(0) {
            return Err("Chunk size must be at least 1".to_string());
        }

        if self.hours == Some(0) {
            return Err("Time window must be at least 1 hour".to_string());
        }

        if self.max_iterations == Some(0) {
            return Err("Max iterations must be at least 1".to_string());
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(apps) = &self.apps {
            if apps.iter().all(|a| a.trim().is_empty()) {
                return Err("At least one app label is required".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
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
