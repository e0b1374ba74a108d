pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use branchline_core::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "branchline",
    about = "Branchline operator CLI",
    long_about = "Validate dialogue graphs, review and apply branch suggestions, and run offline conversation simulations.",
    after_help = "Examples:\n  branchline validate --json\n  branchline suggestions list\n  branchline suggestions apply --index 0\n  branchline simulate --context policy_holder_name=Asha"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to branchline.toml")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the branches document path")]
    branches: Option<PathBuf>,
    #[arg(long, global = true, help = "Override the suggestion log path")]
    suggestions: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Validate the branches document and report graph health")]
    Validate {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Review, apply, or drop pending branch suggestions")]
    Suggestions(SuggestionsCommand),
    #[command(about = "Drive a conversation from stdin against the live graph (offline)")]
    Simulate {
        #[arg(long = "context", value_name = "KEY=VALUE", help = "Conversation context entries")]
        context: Vec<String>,
    },
    #[command(about = "Inspect effective configuration values with secret redaction")]
    Config,
}

#[derive(Debug, Subcommand)]
enum SuggestionsCommand {
    #[command(about = "List pending suggestions with their activation triples")]
    List,
    #[command(about = "Commit pending suggestions into the branches document")]
    Apply {
        #[arg(long = "index", help = "Apply only the given indices (default: all)")]
        index: Vec<usize>,
    },
    #[command(about = "Drop all pending suggestions without applying them")]
    Clear,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config.clone(),
        require_file: cli.config.is_some(),
        overrides: ConfigOverrides {
            branches_path: cli.branches.clone(),
            suggestions_path: cli.suggestions.clone(),
            ..ConfigOverrides::default()
        },
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::from(2);
        }
    };
    init_logging(&config);

    let result = match cli.command {
        Command::Validate { json } => commands::validate::run(&config, json),
        Command::Suggestions(SuggestionsCommand::List) => commands::suggestions::list(&config),
        Command::Suggestions(SuggestionsCommand::Apply { index }) => {
            commands::suggestions::apply(&config, &index)
        }
        Command::Suggestions(SuggestionsCommand::Clear) => commands::suggestions::clear(&config),
        Command::Simulate { context } => commands::simulate::run(&config, &context),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&config) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match config.logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    // A second init (tests, embedding) is fine to ignore.
    let _ = installed;
}
