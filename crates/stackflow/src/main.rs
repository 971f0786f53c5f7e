mod commands;
mod console;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Run OpenStack node and relationship operations outside the orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke one operation against a context file
    Invoke {
        /// Operation context (JSON)
        #[arg(short, long)]
        context: PathBuf,
        /// Operation name, overriding the one in the context
        #[arg(short, long)]
        operation: Option<String>,
        /// Operation inputs (YAML or JSON)
        #[arg(short, long)]
        inputs: Option<PathBuf>,
        /// Run against an in-memory cloud persisted at this path
        #[arg(short, long, env = "STACKFLOW_MEMORY")]
        memory: Option<PathBuf>,
        /// Write the updated runtime properties back into the context file
        #[arg(short, long)]
        write_back: bool,
    },
    /// List the supported operations per node and relationship type
    Operations {
        /// Only show targets containing this text
        filter: Option<String>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // plugin records go to the host logger; this only covers the binary itself
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match cli.command {
        Commands::Invoke {
            context,
            operation,
            inputs,
            memory,
            write_back,
        } => {
            let request = commands::invoke::Request {
                context,
                operation,
                inputs,
                memory,
                write_back,
            };
            let code = commands::invoke::handle(request).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Operations { filter } => {
            commands::operations::handle(filter.as_deref());
        }
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
