mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::init::InitArgs;
use crossdeploy_core::template::Format;
use crossdeploy_core::trigger::ReferenceEvent;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "crossdeploy",
    about = "Render, check and dry-run a cross-account CodePipeline deployment stack",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .crossdeploy/ or .git/)
    #[arg(long, global = true, env = "CROSSDEPLOY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter .crossdeploy/stack.yaml
    Init(InitArgs),

    /// Run every check over the stack configuration
    Validate,

    /// Render the CloudFormation template
    Render {
        /// json or yaml
        #[arg(long, default_value = "json")]
        format: Format,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show what changed since the last render
    Plan,

    /// Show stack outputs as they would read after deployment
    Outputs,

    /// Print the cross-account deployment role ARN
    Arn {
        /// Target account (default: from stack.yaml)
        #[arg(long, requires = "role")]
        account: Option<String>,

        /// Role name (default: from stack.yaml)
        #[arg(long, requires = "account")]
        role: Option<String>,
    },

    /// Print the trust policies the target account must provision
    Trust,

    /// Route a repository event through the trigger rules
    Trigger {
        #[arg(long)]
        branch: String,

        /// Repository name (default: from stack.yaml)
        #[arg(long)]
        repository: Option<String>,

        /// created, updated or deleted
        #[arg(long, default_value = "updated")]
        event: ReferenceEvent,

        #[arg(long)]
        commit: Option<String>,
    },

    /// Run one pipeline execution locally against the working tree
    Simulate {
        /// Shell command standing in for the buildspec
        #[arg(long, default_value = "true")]
        build_command: String,

        #[arg(long)]
        commit: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Simulate { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init(args) => cmd::init::run(&root, args, cli.json),
        Commands::Validate => cmd::validate::run(&root, cli.json),
        Commands::Render { format, out } => cmd::render::run(&root, format, out.as_deref(), cli.json),
        Commands::Plan => cmd::plan::run(&root, cli.json),
        Commands::Outputs => cmd::outputs::run(&root, cli.json),
        Commands::Arn { account, role } => {
            cmd::arn::run(&root, account.as_deref(), role.as_deref(), cli.json)
        }
        Commands::Trust => cmd::trust::run(&root, cli.json),
        Commands::Trigger {
            branch,
            repository,
            event,
            commit,
        } => cmd::trigger::run(&root, &branch, repository.as_deref(), event, commit, cli.json),
        Commands::Simulate {
            build_command,
            commit,
        } => cmd::simulate::run(&root, &build_command, commit, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
