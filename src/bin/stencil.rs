//! stencil CLI - validate blueprint fixtures, print schemas and layouts
//!
//! Loads YAML blueprint definitions into an in-memory backend through the
//! full store pipeline, so every invariant (naming, shape, rules, embed
//! acyclicity) is checked exactly as an editor session would check it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use stencil::{load_path, project, Backend, MemoryBackend, ProjectorConfig};

#[derive(Parser)]
#[command(name = "stencil")]
#[command(version, about = "Blueprint schema engine for composable content models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate blueprint fixtures without further output
    Validate {
        /// Fixture file or directory of YAML fixtures
        path: PathBuf,
    },

    /// Print the flattened field schema of one blueprint as JSON
    Schema {
        /// Fixture file or directory of YAML fixtures
        path: PathBuf,

        /// Blueprint code to inspect
        #[arg(short, long)]
        blueprint: String,
    },

    /// Print the projected flow graph (nodes with coordinates, edges) as JSON
    Layout {
        /// Fixture file or directory of YAML fixtures
        path: PathBuf,

        /// Blueprint code to inspect
        #[arg(short, long)]
        blueprint: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Validate { path } => {
            let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
            let created = load_path(backend, &path).await?;
            println!("ok: {} blueprint(s) valid", created.len());
        }
        Commands::Schema { path, blueprint } => {
            let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
            load_path(backend.clone(), &path).await?;
            let target = find_blueprint(&backend, &blueprint).await?;
            let schema = backend.get_schema(target).await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Layout { path, blueprint } => {
            let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
            load_path(backend.clone(), &path).await?;
            let target = find_blueprint(&backend, &blueprint).await?;
            let rows = backend.list_paths(target).await?;
            let tree = stencil::PathTree::from_rows(target, rows);
            let graph = project(&tree, &ProjectorConfig::default());
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
    }
    Ok(())
}

async fn find_blueprint(
    backend: &Arc<dyn Backend>,
    code: &str,
) -> Result<stencil::BlueprintId, Box<dyn std::error::Error>> {
    let blueprints = backend.list_blueprints().await?;
    blueprints
        .into_iter()
        .find(|b| b.code == code)
        .map(|b| b.id)
        .ok_or_else(|| format!("no blueprint with code '{}'", code).into())
}
