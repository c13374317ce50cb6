//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docflow_core::{DirectoryLoader, Engine, PipelineGraph, StatusSink, step_stats};
use docflow_shared::{
    AppConfig, Pipeline, PipelineStatus, Provider, init_config, load_config, validate_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docflow: run LLM and code steps over a document collection.
#[derive(Parser)]
#[command(
    name = "docflow",
    version,
    about = "Run document-processing pipelines of LLM and code steps.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Provider overrides applied on top of the config file.
#[derive(Args, Debug, Default, Clone)]
pub(crate) struct ProviderArgs {
    /// Provider: openai, anthropic, gemini, groq, ollama, openrouter, local.
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Model id to send to the provider.
    #[arg(long)]
    pub model: Option<String>,

    /// Environment variable holding the provider credential.
    #[arg(long)]
    pub api_key_env: Option<String>,

    /// API base URL (or local runtime address).
    #[arg(long)]
    pub base_url: Option<String>,
}

impl ProviderArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(provider) = self.provider {
            config.llm.provider = provider;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(env) = &self.api_key_env {
            config.llm.api_key_env = env.clone();
        }
        if let Some(url) = &self.base_url {
            config.llm.base_url = Some(url.clone());
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run every step of a pipeline.
    Run {
        /// Pipeline JSON file.
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Replace the pipeline's documents with the .txt/.md files in DIR.
        #[arg(short, long)]
        docs: Option<PathBuf>,

        /// Write the updated pipeline here (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Run one step against one document without a full run.
    TestStep {
        /// Pipeline JSON file.
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Step id.
        #[arg(long)]
        step: String,

        /// Document id.
        #[arg(long)]
        doc: String,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Check a pipeline's graph without running it.
    Validate {
        /// Pipeline JSON file.
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Show average timing, tokens, and cost per step of a finished pipeline.
    Stats {
        /// Pipeline JSON file.
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Model used for cost lookup (defaults to the configured model).
        #[arg(long)]
        model: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docflow=info",
        1 => "docflow=debug",
        _ => "docflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so `run` can stream the pipeline JSON on stdout.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            pipeline,
            docs,
            out,
            provider,
        } => cmd_run(&pipeline, docs.as_deref(), out.as_deref(), &provider).await,
        Command::TestStep {
            pipeline,
            step,
            doc,
            provider,
        } => cmd_test_step(&pipeline, &step, &doc, &provider).await,
        Command::Validate { pipeline } => cmd_validate(&pipeline).await,
        Command::Stats { pipeline, model } => cmd_stats(&pipeline, model.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn read_pipeline(path: &Path) -> Result<Pipeline> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .wrap_err_with(|| format!("cannot read pipeline '{}'", path.display()))?;
    let pipeline = serde_json::from_str(&raw)
        .wrap_err_with(|| format!("'{}' is not a valid pipeline", path.display()))?;
    Ok(pipeline)
}

fn build_engine(overrides: &ProviderArgs) -> Result<Engine> {
    let mut config = load_config()?;
    overrides.apply(&mut config);
    validate_config(&config)?;
    Ok(Engine::from_config(&config)?)
}

async fn cmd_run(
    pipeline_path: &Path,
    docs: Option<&Path>,
    out: Option<&Path>,
    overrides: &ProviderArgs,
) -> Result<()> {
    let mut engine = build_engine(overrides)?;
    engine.set_pipeline(read_pipeline(pipeline_path).await?);

    let reporter = CliProgress::new();

    if let Some(dir) = docs {
        let count = engine
            .load_documents(&DirectoryLoader::new(dir), &reporter)
            .await?;
        info!(count, dir = %dir.display(), "documents loaded");
    }

    info!(
        steps = engine.pipeline().steps.len(),
        docs = engine.documents().len(),
        "running pipeline"
    );

    let finished = engine.run_pipeline(&reporter).await?;
    let json = serde_json::to_string_pretty(finished)?;

    match out {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .wrap_err_with(|| format!("cannot write '{}'", path.display()))?;
            eprintln!();
            eprintln!("  Pipeline complete!");
            eprintln!("  Steps:     {}", finished.steps.len());
            eprintln!("  Documents: {}", finished.documents().len());
            eprintln!("  Output:    {}", path.display());
            eprintln!();
        }
        None => println!("{json}"),
    }

    Ok(())
}

async fn cmd_test_step(
    pipeline_path: &Path,
    step_id: &str,
    doc_id: &str,
    overrides: &ProviderArgs,
) -> Result<()> {
    let mut engine = build_engine(overrides)?;
    engine.set_pipeline(read_pipeline(pipeline_path).await?);

    let step = engine
        .pipeline()
        .step(step_id)
        .cloned()
        .ok_or_else(|| eyre!("no step with id '{step_id}' in {}", pipeline_path.display()))?;

    let result = engine.test_step(&step, doc_id).await?;

    println!("{}", result.result);
    eprintln!();
    eprintln!("  Step:   {} ({})", step.name, step.id);
    eprintln!("  Doc:    {doc_id}");
    eprintln!("  Time:   {:.1} ms", result.timing_ms);
    if let Some(usage) = result.usage {
        eprintln!(
            "  Tokens: {} prompt / {} completion",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    Ok(())
}

async fn cmd_validate(pipeline_path: &Path) -> Result<()> {
    let pipeline = read_pipeline(pipeline_path).await?;
    let graph = PipelineGraph::build(&pipeline)?;

    println!("  Pipeline is valid.");
    println!("  Steps:     {}", pipeline.steps.len());
    println!("  Documents: {}", pipeline.documents().len());
    for step in &pipeline.steps {
        let from = graph.predecessor(&step.id).map(|p| p.id()).unwrap_or("?");
        println!(
            "    {from} -> {} [{} / {}] {}",
            step.id,
            step.kind.as_str(),
            step.input_mode.as_str(),
            step.name
        );
    }
    if !graph.feeds_output() {
        println!("  Warning: no node connects to the output.");
    }
    Ok(())
}

async fn cmd_stats(pipeline_path: &Path, model: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let pipeline = read_pipeline(pipeline_path).await?;
    let model = model.unwrap_or(&config.llm.model);

    let stats = step_stats(&pipeline, Some(model), &config.model_costs);
    if stats.is_empty() {
        println!("No step results in {}.", pipeline_path.display());
        return Ok(());
    }

    println!(
        "{:<24} {:>5} {:>11} {:>10} {:>10} {:>10}",
        "STEP", "RUNS", "AVG MS", "PROMPT", "COMPL", "COST $"
    );
    for s in &stats {
        let fmt_opt = |v: Option<f64>, precision: usize| {
            v.map(|v| format!("{v:.precision$}")).unwrap_or_else(|| "-".into())
        };
        println!(
            "{:<24} {:>5} {:>11.1} {:>10} {:>10} {:>10}",
            truncate(&s.step_name, 24),
            s.runs,
            s.avg_timing_ms,
            fmt_opt(s.avg_prompt_tokens, 0),
            fmt_opt(s.avg_completion_tokens, 0),
            fmt_opt(s.avg_cost_usd, 6),
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Status sink driving an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl StatusSink for CliProgress {
    fn status(&self, status: &PipelineStatus) {
        match status {
            PipelineStatus::Sourcing => self.spinner.set_message("Loading documents"),
            PipelineStatus::Running {
                step_index,
                total_steps,
                step_id,
            } => self.spinner.set_message(format!(
                "Running step [{}/{total_steps}] {step_id}",
                step_index + 1
            )),
            PipelineStatus::Error { .. } => self.spinner.finish_and_clear(),
            other => self.spinner.set_message(other.to_string()),
        }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}
