//! Trapchain - LLM-assisted SOC summaries for honeypot logs
//!
//! A CLI tool that pulls honeypot logs from Loki, has a language model
//! classify them chunk by chunk, consolidates the results by actor and
//! writes a SOC summary report.
//!
//! Exit codes:
//!   0 - Success (including runs with no relevant events)
//!   1 - Runtime error (configuration, Loki, model API, report write)

mod analysis;
mod cli;
mod config;
mod llm;
mod loki;
mod models;
mod pipeline;
mod report;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use llm::{LlmAnalyst, OpenAiClient};
use loki::LokiClient;
use models::{SocReport, TimeWindow};
use pipeline::Pipeline;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Trapchain v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_window(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .trapchain.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   The API key is read from OPENAI_API_KEY unless you add it under [model].");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` wins over the flags when it is set.
fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(args.log_level().into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the pipeline over the configured window and write the report.
async fn run_window(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;
    debug!("Config: {:?}", config);

    let window = TimeWindow::last_hours(config.pipeline.window_hours)?;

    println!("📥 Loki: {}", config.loki.url);
    println!(
        "   Apps: {} (namespace {})",
        config.loki.apps.join(", "),
        config.loki.namespace
    );
    println!(
        "   Window: {} → {} ({}h)",
        window.start.format("%Y-%m-%d %H:%M:%S"),
        window.end.format("%Y-%m-%d %H:%M:%S"),
        config.pipeline.window_hours
    );

    let backend = LokiClient::new(
        &config.loki.url,
        Duration::from_secs(config.loki.timeout_seconds),
    )?;

    println!("🤖 Model: {} via {}", config.model.name, config.model.base_url);
    println!(
        "   Chunk size: {} lines, at most {} chunks",
        config.pipeline.chunk_size, config.pipeline.max_iterations
    );

    let model = OpenAiClient::new(config.model_settings()?)?;
    let analyst = LlmAnalyst::new(model);

    let pipeline = Pipeline::new(backend, analyst, config.pipeline_settings(!args.quiet))?;
    let outcome = pipeline.run(window).await?;

    let summary = outcome.report;
    info!(
        start = %summary.window.start,
        end = %summary.window.end,
        rows = summary.rows.len(),
        fetched = outcome.fetched,
        chunks = outcome.iterations,
        "report"
    );
    debug!("Consolidated aggregate: {:?}", outcome.entries);
    for row in &summary.rows {
        debug!(row = %serde_json::to_string(row).unwrap_or_default(), "report row");
    }

    println!("\n📝 Generating report...");
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&summary)?,
        OutputFormat::Markdown => report::generate_markdown_report(&summary),
    };

    let output_path = &config.report.output;
    report::write_report(output_path, &output)?;

    print_summary(&summary);
    println!("   Lines fetched: {}", outcome.fetched);
    println!("   Chunks classified: {}", outcome.iterations);
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(())
}

/// Print the severity breakdown to the console.
fn print_summary(report: &SocReport) {
    println!("\n📊 Summary:");

    if report.is_empty() {
        println!("   No relevant events.");
        return;
    }

    println!("   {:<10} {:>6}", "severity", "count");
    for entry in &report.counts {
        println!(
            "   {} {:<8} {:>6}",
            entry.severity.emoji(),
            entry.severity,
            entry.count
        );
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
