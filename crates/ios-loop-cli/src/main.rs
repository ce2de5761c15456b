mod cmd;
mod context;
mod output;
mod root;
mod tools;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ios-agentic-loop",
    about = "MCP server that drives an iOS simulator through simctl, idb and Maestro",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest directory with ios-agentic-loop.yaml, else cwd)
    #[arg(long, global = true, env = "IOS_AGENTIC_LOOP_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (the default)
    Mcp,

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Resolve and print the target simulator UDID
    Device,

    /// Check that the required external tools are installed
    Doctor,

    /// Parse a saved Maestro report (`-` for stdin)
    ParseReport { file: PathBuf },
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Mcp);

    let default_level = match &command {
        Commands::Mcp => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match command {
        Commands::Mcp => cmd::mcp::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Device => cmd::device::run(&root, cli.json),
        Commands::Doctor => cmd::doctor::run(cli.json),
        Commands::ParseReport { file } => cmd::parse_report::run(&file, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
