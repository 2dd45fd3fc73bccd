use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(
    version,
    about = "Workflow orchestrator - drive features through phased delivery with agent workers and human gates"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file (defaults to ./foreman.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestration loop until interrupted
    Run,
    /// Create a new feature and start its workflow
    Create {
        /// Feature title
        title: String,
        /// Feature description (defaults to the title)
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Resume an interrupted setup phase for an existing feature
    Resume { feature_id: u64 },
    /// Approve the gate a feature is currently waiting at
    Approve { feature_id: u64 },
    /// Show one feature's workflow status
    Status { feature_id: u64 },
    /// List all tracked features
    List,
    /// Cancel a feature's workflow
    Cancel {
        feature_id: u64,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    foreman::logging::init(cli.verbose);

    match &cli.command {
        Commands::Run => cmd::cmd_run(&cli).await,
        Commands::Create { title, description } => {
            cmd::cmd_create(&cli, title, description.as_deref()).await
        }
        Commands::Resume { feature_id } => cmd::cmd_resume(&cli, *feature_id).await,
        Commands::Approve { feature_id } => cmd::cmd_approve(&cli, *feature_id).await,
        Commands::Status { feature_id } => cmd::cmd_status(&cli, *feature_id).await,
        Commands::List => cmd::cmd_list(&cli).await,
        Commands::Cancel { feature_id, force } => cmd::cmd_cancel(&cli, *feature_id, *force).await,
    }
}
