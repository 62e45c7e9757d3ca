mod cmd;
mod output;
mod session;

use clap::{Parser, Subcommand};
use cmd::{
    action::ActionSubcommand, config::ConfigSubcommand, playbook::PlaybookSubcommand,
    rule::RuleSubcommand, version::VersionSubcommand,
};
use session::Session;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "socpb",
    about = "Manage SOC playbooks, their versions, and which version is active",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.socpb/config.yaml)
    #[arg(long, global = true, env = "SOCPB_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace id (default: workspace_id from config)
    #[arg(long, short = 'w', global = true)]
    workspace: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log API requests and state transitions
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect, and audit playbooks
    Playbook {
        #[command(subcommand)]
        subcommand: PlaybookSubcommand,
    },

    /// Manage playbook versions and their activation
    Version {
        #[command(subcommand)]
        subcommand: VersionSubcommand,
    },

    /// Manage the actions of a version
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Manage the trigger rule of a version
    Rule {
        #[command(subcommand)]
        subcommand: RuleSubcommand,
    },

    /// Show or validate the client configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = Session::load(cli.config.as_deref(), cli.workspace).and_then(|session| {
        match cli.command {
            Commands::Playbook { subcommand } => cmd::playbook::run(&session, subcommand, cli.json),
            Commands::Version { subcommand } => cmd::version::run(&session, subcommand, cli.json),
            Commands::Action { subcommand } => cmd::action::run(&session, subcommand, cli.json),
            Commands::Rule { subcommand } => cmd::rule::run(&session, subcommand, cli.json),
            Commands::Config { subcommand } => cmd::config::run(&session, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
