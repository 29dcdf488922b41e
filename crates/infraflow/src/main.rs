mod commands;
mod program;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "infra")]
#[command(about = "Declare AWS infrastructure as typed components, configured with KDL", long_about = None)]
struct Cli {
    /// Stack to operate on; may be omitted when infra.kdl declares only one
    #[arg(short, long, global = true, env = "INFRA_STACK")]
    stack: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the changes `up` would make
    Preview,
    /// Create or update the stack's resources
    Up {
        /// Apply without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete every resource of the stack
    Destroy {
        /// Destroy without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the stack outputs of the last apply
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the component tree of the stack
    Graph,
    /// Check infra.kdl and the stack's program
    Validate,
    /// Print version information
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stack = cli.stack.as_deref();
    let result = match cli.command {
        Commands::Preview => commands::preview::handle(stack).await,
        Commands::Up { yes } => commands::up::handle(stack, yes).await,
        Commands::Destroy { yes } => commands::destroy::handle(stack, yes).await,
        Commands::Outputs { json } => commands::outputs::handle(stack, json).await,
        Commands::Graph => commands::graph::handle(stack).await,
        Commands::Validate => commands::validate::handle(stack).await,
        Commands::Version => {
            println!("infraflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}", format!("✗ {:#}", e).red().bold());
        std::process::exit(1);
    }
    Ok(())
}
