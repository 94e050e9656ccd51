//! StreamHouse SQL Shell (streamshell)
//!
//! ## Quick Start
//!
//! ```bash
//! # Interactive shell against a statement service
//! export STREAMHOUSE_API_URL=http://localhost:8080
//! streamshell --principal sa-123
//!
//! # Try it without a server
//! streamshell --fake
//!
//! # Run statements and exit
//! streamshell --fake -e "static;" -e "mode changelog" -e "show"
//! ```
//!
//! ## Configuration
//!
//! Settings are read from `~/.streamhouse/shell.toml` and overridden by flags
//! and environment variables.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use streamhouse_shell::config::{Config, OutputFormat};
use streamhouse_shell::controller::StatementController;
use streamhouse_shell::fake_store::{FakeStatementStore, DEFAULT_FAKE_PRINCIPAL};
use streamhouse_shell::input::{InputSource, ScriptedInput, TerminalInput};
use streamhouse_shell::repl::{LineAction, Repl, Shell, ShellHost};
use streamhouse_shell::rest_client::RestStatementStore;
use streamhouse_shell::statement::StatementStore;

#[derive(Parser)]
#[command(name = "streamshell")]
#[command(about = "StreamHouse interactive SQL shell", long_about = None)]
struct Cli {
    /// REST API URL
    #[arg(long, env = "STREAMHOUSE_API_URL")]
    api_url: Option<String>,

    /// Identity statements run as (u-... or sa-...)
    #[arg(long, env = "STREAMHOUSE_PRINCIPAL")]
    principal: Option<String>,

    /// Capacity of the changelog and table views
    #[arg(long)]
    max_results: Option<usize>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Use the in-process statement store instead of the REST API
    #[arg(long)]
    fake: bool,

    /// Run a statement or command and exit (repeatable). Statements still
    /// running are detached instead of awaited
    #[arg(short, long = "execute")]
    execute: Vec<String>,

    /// Write the effective configuration to ~/.streamhouse/shell.toml
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: Level,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Table,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Table => OutputFormat::Table,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Main entry point for the shell.
///
/// 1. Parses command-line arguments and installs logging
/// 2. Loads the config file and applies overrides
/// 3. Runs the given statements, or the interactive REPL when there are none
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;

    let mut config = Config::load().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);

    if cli.save_config {
        config.save().context("Failed to save configuration")?;
        println!("Configuration written to {}", Config::config_path().display());
    }

    let store: Arc<dyn StatementStore> = if cli.fake {
        info!("Using in-process statement store");
        Arc::new(FakeStatementStore::new(config.principal.clone()))
    } else {
        info!(url = %config.rest_api_url, "Using statement service");
        Arc::new(
            RestStatementStore::new(config.rest_api_url.clone(), config.principal.clone())
                .with_poll_interval(config.status_poll()),
        )
    };

    let interactive = cli.execute.is_empty();
    let input: Arc<dyn InputSource> = if interactive {
        Arc::new(TerminalInput::new())
    } else {
        Arc::new(ScriptedInput::silent())
    };

    let host = Arc::new(ShellHost::default());
    let controller = StatementController::new(host.clone(), store.clone(), input)
        .with_input_poll(config.input_poll())
        .with_detach_when_unattended(!interactive);
    let mut shell = Shell::new(controller, store, host, &config, interactive);

    if interactive {
        let mut repl = Repl::new(shell)?;
        repl.run().await?;
    } else {
        for line in &cli.execute {
            if shell.handle_line(line).await? == LineAction::Exit {
                break;
            }
        }
        shell.shutdown().await;
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(url) = &cli.api_url {
        config.rest_api_url = url.clone();
    }
    if let Some(principal) = &cli.principal {
        config.principal = principal.clone();
    } else if cli.fake && config.principal == Config::default().principal {
        config.principal = DEFAULT_FAKE_PRINCIPAL.to_string();
    }
    if let Some(max_results) = cli.max_results {
        config.max_results = max_results;
    }
    if let Some(format) = cli.format {
        config.output_format = format.into();
    }
}
