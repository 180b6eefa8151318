//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chronicler_core::{Chronicler, ProgressReporter, ResearchAction, ResearchOutput, render_markdown};
use chronicler_fetcher::HttpFetcher;
use chronicler_llm::{OpenRouterClient, RetryPolicy, RetryingModel};
use chronicler_shared::{AppConfig, ResearchRequest, init_config, load_config, validate_api_key};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Chronicler: research a life, get a timeline.
#[derive(Parser)]
#[command(
    name = "chronicler",
    version,
    about = "Research a person from public reference sources and build a dated chronology of their life.",
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

/// Output format for a finished chronology.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Json,
    Markdown,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research a subject and emit its chronology.
    Research {
        /// Person to research, e.g. "Ada Lovelace".
        subject: String,

        /// Narrow the research to one question about the subject.
        #[arg(short, long)]
        question: Option<String>,

        /// Write the result to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output format.
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,

        /// Override research.max_iterations.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Override research.max_fetches.
        #[arg(long)]
        max_fetches: Option<u32>,

        /// Override the model id.
        #[arg(long, env = "CHRONICLER_MODEL")]
        model: Option<String>,

        /// Let the planner fetch twice in a row without reflecting.
        #[arg(long)]
        no_alternation: bool,
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
    /// Initialize the config file with defaults.
    Init,
    /// Show the current effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "chronicler=info",
        1 => "chronicler=debug",
        _ => "chronicler=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries the chronology; logs go to stderr.
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
        Command::Research {
            subject,
            question,
            out,
            format,
            max_iterations,
            max_fetches,
            model,
            no_alternation,
        } => {
            let overrides = Overrides {
                max_iterations,
                max_fetches,
                model,
                no_alternation,
            };
            cmd_research(subject, question, out, format, overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

struct Overrides {
    max_iterations: Option<u32>,
    max_fetches: Option<u32>,
    model: Option<String>,
    no_alternation: bool,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(n) = self.max_iterations {
            config.research.max_iterations = n;
        }
        if let Some(n) = self.max_fetches {
            config.research.max_fetches = n;
        }
        if let Some(model) = self.model {
            config.model.default_model = model;
        }
        if self.no_alternation {
            config.research.enforce_alternation = false;
        }
    }
}

async fn cmd_research(
    subject: String,
    question: Option<String>,
    out: Option<PathBuf>,
    format: OutputFormat,
    overrides: Overrides,
) -> Result<()> {
    let mut config = load_config()?;
    overrides.apply(&mut config);
    config.validate()?;
    let api_key = validate_api_key(&config)?;

    let client = OpenRouterClient::new(&config.model, api_key)?;
    let model = Arc::new(RetryingModel::new(
        Arc::new(client),
        RetryPolicy::from(&config.model),
    ));
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing with what has been gathered");
            ctrl_c.cancel();
        }
    });

    let mut request = ResearchRequest::new(subject);
    if let Some(question) = question {
        request = request.with_question(question);
    }

    info!(
        subject = %request.subject,
        model = %config.model.default_model,
        "starting research"
    );

    let chronicler = Chronicler::new(model, fetcher, config).with_cancellation(cancel);
    let reporter = CliProgress::new();
    let output = chronicler.run(&request, &reporter).await?;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&output)?,
        OutputFormat::Markdown => render_markdown(&output),
    };

    match &out {
        Some(path) => {
            std::fs::write(path, &rendered)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            print_summary(&output, Some(path.as_path()));
        }
        None => {
            println!("{rendered}");
            print_summary(&output, None);
        }
    }

    Ok(())
}

fn print_summary(output: &ResearchOutput, path: Option<&Path>) {
    let elapsed = output.finished_at - output.started_at;
    eprintln!();
    eprintln!("  Chronology ready!");
    eprintln!("  Run:        {}", output.run_id);
    eprintln!("  Subject:    {}", output.subject);
    eprintln!("  Events:     {}", output.events.len());
    eprintln!("  Sources:    {}", output.used_sources.len());
    eprintln!("  Iterations: {}", output.iterations);
    eprintln!("  Finished:   {}", output.finish_reason);
    if let Some(path) = path {
        eprintln!("  Path:       {}", path.display());
    }
    eprintln!(
        "  Time:       {:.1}s",
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    eprintln!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn action(&self, iteration: u32, action: &ResearchAction) {
        let msg = match action {
            ResearchAction::Fetch { url, .. } if url.is_empty() => {
                format!("[{iteration}] Fetching next source")
            }
            ResearchAction::Fetch { url, .. } => format!("[{iteration}] Fetching {url}"),
            ResearchAction::Reflect { .. } => format!("[{iteration}] Reflecting on gaps"),
            ResearchAction::Finish { .. } => format!("[{iteration}] Finishing"),
        };
        self.spinner.set_message(msg);
    }

    fn source_done(&self, source: &str, categories_updated: usize) {
        self.spinner
            .println(format!("  ✓ {source} ({categories_updated} categories updated)"));
    }

    fn source_failed(&self, source: &str, reason: &str) {
        self.spinner.println(format!("  ✗ {source}: {reason}"));
    }

    fn done(&self, _output: &ResearchOutput) {
        self.spinner.finish_and_clear();
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
