mod cmd;
mod output;
mod root;
mod tools;

use clap::{Parser, Subcommand};
use cmd::{
    audit::AuditSubcommand, checkpoint::CheckpointSubcommand, config::ConfigSubcommand,
    plan::PlanSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "steward",
    about = "Approval-gated action steward: execute approved plans, serve adapter tools, record failures",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from .steward/)
    #[arg(long, global = true, env = "STEWARD_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a steward workspace in the current directory
    Init,

    /// Run as an MCP stdio server for one adapter
    Mcp {
        /// Adapter to serve: email, facebook, instagram, linkedin, odoo
        #[arg(long)]
        server: String,
    },

    /// Execute the newest approved plan for a domain
    Execute {
        /// Domain tag (plan header `operation`, or file-name prefix)
        #[arg(long)]
        domain: String,

        /// Validate only; do not call any adapter
        #[arg(long)]
        dry_run: bool,

        /// Skip remaining actions after the first failure
        #[arg(long)]
        stop_on_first_error: bool,
    },

    /// Record an infrastructure failure and create a remediation task
    ReportFailure {
        /// connection_timeout | auth_failure | rate_limit | server_error
        #[arg(long = "type", value_name = "TYPE")]
        failure_type: String,

        /// Server the failure came from
        #[arg(long)]
        server: String,

        /// Error text as reported by the server
        #[arg(long)]
        message: String,
    },

    /// Inspect and prune the audit log
    Audit {
        #[command(subcommand)]
        subcommand: AuditSubcommand,
    },

    /// Inspect and reset perception checkpoints
    Checkpoint {
        #[command(subcommand)]
        subcommand: CheckpointSubcommand,
    },

    /// Turn new items from a source into needs_action tasks
    Watch {
        /// Source name (e.g. gmail, whatsapp)
        #[arg(long)]
        source: String,

        /// JSON file holding an array of {id, title?, body?, received_at?}
        #[arg(long)]
        input: PathBuf,
    },

    /// Parse and validate plan files
    Plan {
        #[command(subcommand)]
        subcommand: PlanSubcommand,
    },

    /// Validate the workspace configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Mcp { .. } | Commands::Execute { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    // stdout carries protocol frames and command output; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Mcp { server } => cmd::mcp::run(&root, &server),
        Commands::Execute {
            domain,
            dry_run,
            stop_on_first_error,
        } => cmd::execute::run(&root, &domain, dry_run, stop_on_first_error, cli.json),
        Commands::ReportFailure {
            failure_type,
            server,
            message,
        } => cmd::report_failure::run(&root, &failure_type, &server, &message, cli.json),
        Commands::Audit { subcommand } => cmd::audit::run(&root, subcommand, cli.json),
        Commands::Checkpoint { subcommand } => cmd::checkpoint::run(&root, subcommand, cli.json),
        Commands::Watch { source, input } => cmd::watch::run(&root, &source, &input, cli.json),
        Commands::Plan { subcommand } => cmd::plan::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
