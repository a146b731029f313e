//! Kiln - Sandboxed build-and-run service
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::args::ConfigAction;
use kiln::cli::{Cli, Commands};
use kiln::config::{Config, ConfigManager};
use kiln::error::KilnResult;
use kiln::ui::{self, UiContext};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // A broken config file must not prevent rewriting it
    let config = match cli.command {
        Commands::Config(ref args) if matches!(args.action, Some(ConfigAction::Init { .. })) => {
            Config::default()
        }
        _ => config_manager.load().await?,
    };

    init_logging(cli.verbose, &config.general.log_format);

    if UiContext::detect().is_interactive() {
        ui::init_theme();
    }

    match cli.command {
        Commands::Serve(args) => kiln::cli::commands::serve(args, &config).await,
        Commands::Generate(args) => kiln::cli::commands::generate(args, &config).await,
        Commands::Cache(args) => kiln::cli::commands::cache(args, &config).await,
        Commands::Template(args) => kiln::cli::commands::template(args, &config).await,
        Commands::Config(args) => {
            kiln::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, format: &str) {
    let default_filter = match verbose {
        0 => "kiln=warn",
        1 => "kiln=info,tower_http=info",
        _ => "kiln=debug,tower_http=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
