//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - Sandboxed build-and-run service
///
/// Builds untrusted scripts in throwaway workspaces, runs them under a
/// deadline and returns what they print.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve(ServeArgs),

    /// Build and run a script, printing its output
    Generate(GenerateArgs),

    /// Manage the output cache
    Cache(CacheArgs),

    /// Manage the prebuilt dependency template
    Template(TemplateArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on (overrides server.bind)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Do not build the template at startup
    #[arg(long)]
    pub no_warm: bool,
}

/// Arguments for the generate command
#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Script file to run (reads stdin when omitted or "-")
    pub file: Option<PathBuf>,

    /// Deadline for build and run, in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Output format
    #[arg(short, long, default_value = "plain")]
    pub format: OutputFormat,
}

/// Output format for commands that print results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Just the text
    Plain,
    /// The HTTP response shape
    Json,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry count and size
    Stats {
        /// Output format
        #[arg(short, long, default_value = "plain")]
        format: OutputFormat,
    },

    /// Remove every cached output
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the template command
#[derive(Parser, Debug)]
pub struct TemplateArgs {
    /// Subcommand for template
    #[command(subcommand)]
    pub action: TemplateAction,
}

/// Template subcommands
#[derive(Subcommand, Debug)]
pub enum TemplateAction {
    /// Show whether the template is missing, being built or ready
    Status,

    /// Build the template now
    Warm,

    /// Delete the template; the next request rebuilds it
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_generate() {
        let cli = Cli::parse_from(["kiln", "generate", "script.sh", "--timeout", "30"]);
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.file, Some(PathBuf::from("script.sh")));
                assert_eq!(args.timeout, Some(30.0));
                assert_eq!(args.format, OutputFormat::Plain);
            }
            _ => panic!("expected Generate command"),
        }
    }

    #[test]
    fn cli_parses_generate_from_stdin() {
        let cli = Cli::parse_from(["kiln", "generate", "-f", "json"]);
        match cli.command {
            Commands::Generate(args) => {
                assert!(args.file.is_none());
                assert_eq!(args.format, OutputFormat::Json);
            }
            _ => panic!("expected Generate command"),
        }
    }

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::parse_from(["kiln", "serve", "--bind", "0.0.0.0:9000", "--no-warm"]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
                assert!(args.no_warm);
            }
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parses_cache_clear() {
        let cli = Cli::parse_from(["kiln", "cache", "clear", "-y"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Clear { yes },
            }) => assert!(yes),
            _ => panic!("expected cache clear"),
        }
    }

    #[test]
    fn cli_parses_template_status() {
        let cli = Cli::parse_from(["kiln", "template", "status"]);
        assert!(matches!(
            cli.command,
            Commands::Template(TemplateArgs {
                action: TemplateAction::Status
            })
        ));
    }

    #[test]
    fn cli_verbose_count() {
        let cli = Cli::parse_from(["kiln", "-vv", "config", "path"]);
        assert_eq!(cli.verbose, 2);
    }
}
