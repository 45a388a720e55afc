//! Configuration file handling.
//!
//! This module handles loading `.trapchain.toml`, merging it with CLI
//! and environment values, and validating the result before a run.

use crate::cli::{Args, OutputFormat};
use crate::llm::ModelSettings;
use crate::loki::LogQuery;
use crate::models::TimeWindow;
use crate::pipeline::{PipelineSettings, DEFAULT_MAX_ITERATIONS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".trapchain.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log backend settings.
    #[serde(default)]
    pub loki: LokiConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Chunking and window settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Loki settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LokiConfig {
    /// Loki base URL.
    #[serde(default = "default_loki_url")]
    pub url: String,

    /// Namespace label of the honeypot streams.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// App labels to query.
    #[serde(default = "default_apps")]
    pub apps: Vec<String>,

    /// Maximum entries per query page.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_loki_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            url: default_loki_url(),
            namespace: default_namespace(),
            apps: default_apps(),
            page_limit: default_page_limit(),
            timeout_seconds: default_loki_timeout(),
        }
    }
}

fn default_loki_url() -> String {
    "http://localhost:3100".to_string()
}

fn default_namespace() -> String {
    "honeypots".to_string()
}

fn default_apps() -> Vec<String> {
    vec!["cowrie".to_string(), "dionaea".to_string()]
}

fn default_page_limit() -> usize {
    800
}

fn default_loki_timeout() -> u64 {
    300
}

/// LLM model settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key. Usually supplied through OPENAI_API_KEY instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            timeout_seconds: default_model_timeout(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn default_model() -> String {
    "gpt-4.1-nano".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_model_timeout() -> u64 {
    300
}

/// Chunking and time window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Log lines per model request.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Hours covered by one run, ending now.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Hard cap on chunks classified per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            window_hours: default_window_hours(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}

fn default_window_hours() -> u32 {
    6
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output file path.
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("reports/latest_report.md")
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given on the command line or through the environment
    /// override the file.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref url) = args.loki_url {
            self.loki.url = url.clone();
        }
        if let Some(ref namespace) = args.namespace {
            self.loki.namespace = namespace.clone();
        }
        if let Some(ref apps) = args.apps {
            self.loki.apps = apps
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
        }

        if let Some(ref url) = args.openai_url {
            self.model.base_url = url.clone();
        }
        if let Some(ref key) = args.api_key {
            self.model.api_key = Some(key.clone());
        }
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }

        // One timeout flag covers both clients
        if let Some(timeout) = args.timeout {
            self.loki.timeout_seconds = timeout;
            self.model.timeout_seconds = timeout;
        }

        if let Some(chunk_size) = args.chunk_size {
            self.pipeline.chunk_size = chunk_size;
        }
        if let Some(hours) = args.hours {
            self.pipeline.window_hours = hours;
        }
        if let Some(max_iterations) = args.max_iterations {
            self.pipeline.max_iterations = max_iterations;
        }

        if let Some(ref output) = args.output {
            self.report.output = output.clone();
        } else if args.format == OutputFormat::Json
            && self.report.output.extension().is_some_and(|ext| ext == "md")
        {
            // A configured Markdown path keeps its name but not its extension
            self.report.output.set_extension("json");
        }
    }

    /// Check the merged configuration. Runs before anything touches the
    /// network.
    pub fn validate(&self) -> Result<()> {
        self.api_key()?;

        if self.pipeline.chunk_size == 0 {
            bail!("Chunk size must be at least 1");
        }
        if self.pipeline.window_hours == 0 {
            bail!("Time window must be at least 1 hour");
        }
        TimeWindow::last_hours(self.pipeline.window_hours)
            .and_then(|window| window.bounds_ns())
            .with_context(|| {
                format!("Time window of {} hours is too long", self.pipeline.window_hours)
            })?;
        if self.pipeline.max_iterations == 0 {
            bail!("Max iterations must be at least 1");
        }
        if self.loki.apps.is_empty() {
            bail!("At least one honeypot app label is required");
        }
        if self.loki.page_limit == 0 {
            bail!("Loki page limit must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            bail!("Temperature must be between 0.0 and 2.0");
        }
        for (name, url) in [("Loki", &self.loki.url), ("Model API", &self.model.base_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{} URL must start with 'http://' or 'https://'", name);
            }
        }

        Ok(())
    }

    /// The model API key; missing or blank is an error.
    pub fn api_key(&self) -> Result<&str> {
        match self.model.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("Missing model credential: set OPENAI_API_KEY or pass --api-key"),
        }
    }

    /// Settings for the chat-completion client.
    pub fn model_settings(&self) -> Result<ModelSettings> {
        Ok(ModelSettings {
            base_url: self.model.base_url.clone(),
            model_name: self.model.name.clone(),
            api_key: self.api_key()?.to_string(),
            temperature: self.model.temperature,
            timeout_seconds: self.model.timeout_seconds,
        })
    }

    /// Settings for the pipeline.
    pub fn pipeline_settings(&self, show_progress: bool) -> PipelineSettings {
        PipelineSettings {
            query: LogQuery {
                namespace: self.loki.namespace.clone(),
                apps: self.loki.apps.clone(),
                page_limit: self.loki.page_limit,
            },
            chunk_size: self.pipeline.chunk_size,
            max_iterations: self.pipeline.max_iterations,
            show_progress,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
