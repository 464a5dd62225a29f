//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use errscribe_artifacts::{ArtifactStore, FsBookletStore};
use errscribe_core::{Coordinator, CoordinatorFactory, CoordinatorMode, GenerateRequest};
use errscribe_shared::{AppConfig, expand_home, init_config, load_config};
use errscribe_stages::LogAlertPublisher;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// errscribe — turn build errors into researched booklets.
#[derive(Parser)]
#[command(
    name = "errscribe",
    version,
    about = "Run compiler output through a multi-stage AI research pipeline.",
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Analyze a compiler-output file and generate a research booklet.
    Analyze {
        /// Path to the raw compiler output, or `-` for stdin.
        input: String,

        /// Execution strategy: sequential, concurrent, or parallel.
        #[arg(short, long)]
        strategy: Option<String>,

        /// Booklet output directory (defaults to the configured directory).
        #[arg(short, long)]
        out: Option<String>,

        /// File with source context to hand to the analysis stages.
        #[arg(long)]
        context: Option<String>,

        /// Project file (XML) to hand to the analysis stages.
        #[arg(long)]
        project: Option<String>,
    },

    /// List previously generated booklets.
    List {
        /// Booklet directory (defaults to the configured directory).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Report pipeline capability and model availability flags.
    Status {
        /// Execution strategy to query: sequential, concurrent, or parallel.
        #[arg(short, long)]
        strategy: Option<String>,
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

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!(
        "errscribe_cli={level},errscribe_core={level},errscribe_stages={level},\
         errscribe_artifacts={level},errscribe_parser={level},errscribe_shared={level}"
    );

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
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
        Command::Analyze {
            input,
            strategy,
            out,
            context,
            project,
        } => {
            cmd_analyze(
                &input,
                strategy.as_deref(),
                out.as_deref(),
                context.as_deref(),
                project.as_deref(),
            )
            .await
        }
        Command::List { out } => cmd_list(out.as_deref()).await,
        Command::Status { strategy } => cmd_status(strategy.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_analyze(
    input: &str,
    strategy: Option<&str>,
    out: Option<&str>,
    context: Option<&str>,
    project: Option<&str>,
) -> Result<()> {
    let config = load_config()?;
    let coordinator = build_coordinator(&config, strategy, out)?;

    let raw_output = read_input(input)?;
    let code_context = match context {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read context file '{path}': {e}"))?,
        None => String::new(),
    };
    let project_metadata = match project {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read project file '{path}': {e}"))?,
        None => String::new(),
    };
    let hints = BTreeMap::new();

    // Ctrl-C cancels the run cooperatively: no new stage starts, the
    // in-flight call is aborted.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    info!(
        input,
        strategy = %coordinator.mode(),
        "starting booklet generation"
    );

    let spinner = progress_spinner();
    spinner.set_message(format!("Running {} pipeline", coordinator.mode()));

    let request = GenerateRequest {
        raw_compiler_output: &raw_output,
        code_context: &code_context,
        project_metadata: &project_metadata,
        codebase_summary: "",
        hints: &hints,
    };

    let result = coordinator.generate_booklet(&request, &cancel).await;
    spinner.finish_and_clear();

    let result = result.map_err(|e| eyre!("{e}"))?;

    println!();
    println!("  Booklet generated successfully!");
    println!("  ID:       {}", result.booklet.id);
    println!("  Title:    {}", result.booklet.title);
    println!("  Errors:   {}", result.booklet.original_errors.errors.len());
    println!("  Findings: {}", result.booklet.findings.len());
    println!("  Sections: {}", result.booklet.sections.len());
    println!("  Path:     {}", result.persisted_path.display());
    println!("  Time:     {:.1}s", result.total_elapsed_ms as f64 / 1000.0);
    if let Some(saved) = result.time_saved_ms {
        println!("  Saved:    {:.1}s (parallel analyses)", saved as f64 / 1000.0);
    }
    println!();

    Ok(())
}

async fn cmd_list(out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let store = booklet_store(&config, out);

    let booklets = store.list().await.map_err(|e| eyre!("{e}"))?;
    if booklets.is_empty() {
        println!("No booklets found in {}", store.root().display());
        return Ok(());
    }

    println!("Booklets in {}:", store.root().display());
    for name in booklets {
        println!("  {name}");
    }

    Ok(())
}

async fn cmd_status(strategy: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let coordinator = build_coordinator(&config, strategy, None)?;

    let status = coordinator.status();
    for (key, value) in &status {
        println!("  {key}: {value}");
    }

    Ok(())
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
// Helpers
// ---------------------------------------------------------------------------

fn build_coordinator(
    config: &AppConfig,
    strategy: Option<&str>,
    out: Option<&str>,
) -> Result<Coordinator> {
    let mode: CoordinatorMode = strategy
        .unwrap_or(&config.defaults.strategy)
        .parse()
        .map_err(|e| eyre!("{e}"))?;

    let store: Arc<dyn ArtifactStore> = Arc::new(booklet_store(config, out));
    let alerts = Arc::new(LogAlertPublisher);

    CoordinatorFactory::create(mode, config, store, alerts).map_err(|e| eyre!("{e}"))
}

fn booklet_store(config: &AppConfig, out: Option<&str>) -> FsBookletStore {
    let root = expand_home(out.unwrap_or(&config.defaults.output_dir));
    FsBookletStore::new(root)
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| eyre!("cannot read stdin: {e}"))?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input)
            .map_err(|e| eyre!("cannot read input file '{input}': {e}"))
    }
}

fn progress_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}
