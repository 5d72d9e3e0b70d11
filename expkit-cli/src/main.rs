//! Expkit CLI: launch, inspect, and render experiment declarations.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Expkit: declare, inspect, and launch training experiments
#[derive(Parser, Debug)]
#[command(name = "expkit", version, about, long_about = None)]
struct Cli {
    /// Project directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a declared experiment with `hf_action_<name>=<value>` arguments
    Run {
        /// Name of the experiment to run
        #[arg(long = "experiment_name", visible_alias = "experiment-name")]
        experiment_name: String,

        /// Identifier of this run
        #[arg(long = "run_name", visible_alias = "run-name")]
        run_name: String,

        /// Maximum number of repeats (-1 for unlimited)
        #[arg(
            long = "max_repeats",
            visible_alias = "max-repeats",
            default_value_t = -1,
            allow_negative_numbers = true
        )]
        max_repeats: i64,

        /// Project name (defaults to the configured name, then the directory name)
        #[arg(long = "project_name", visible_alias = "project-name")]
        project_name: Option<String>,

        /// Parameter values as key=value pairs
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        extra_args: Vec<String>,
    },
    /// List experiments declared in the project
    List,
    /// Statically extract a declaration file and print it as JSON
    Inspect {
        /// Path to a declaration file
        path: PathBuf,
    },
    /// Print run commands and workflow inputs for declared experiments
    Render {
        /// Only render this experiment
        #[arg(short, long)]
        experiment: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "expkit", "expkit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "expkit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}
