//! Nika CLI - local workflow-orchestration emulator

use clap::{Parser, Subcommand};
use colored::Colorize;
use nika::engine;
use nika::error::{EngineError, FixSuggestion};
use nika::stdlib::Registry;
use nika::store::Store;
use nika::workflow::parser::parse_source;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nika")]
#[command(about = "Nika - local emulator for a workflow orchestration service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file to completion and print its result
    Run {
        /// Path to a workflow source file (YAML or JSON, §4.3)
        file: String,

        /// JSON-encoded execution argument, bound to `main`'s params
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Parse a workflow file and report errors without executing it
    Validate {
        /// Path to a workflow source file (YAML or JSON)
        file: String,
    },

    /// Serve the JSON/HTTP transport against an in-memory store
    Serve {
        /// Address to bind, e.g. 127.0.0.1:8080
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,

        /// Directory to poll for `*.workflow.yaml` files to auto-deploy
        #[arg(short, long)]
        watch: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file, input } => run_workflow(&file, input).await,
        Commands::Validate { file } => validate_workflow(&file).await,
        Commands::Serve { addr, watch } => serve(&addr, watch).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn run_workflow(file: &str, input: Option<String>) -> Result<(), EngineError> {
    let bytes = tokio::fs::read(file).await?;
    let workflow = parse_source(&bytes)?;

    let argument = match input {
        Some(raw) => {
            let json: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
                EngineError::Workflow(nika::WorkflowError::type_error(format!(
                    "--input is not valid JSON: {e}"
                )))
            })?;
            nika::Value::from_json(&json)
        }
        None => nika::Value::Null,
    };

    println!("{} Running {}", "→".cyan(), file.cyan().bold());

    let registry = Registry::with_builtins();
    let cancelled = Arc::new(AtomicBool::new(false));
    let result = engine::run(&workflow, &registry, argument, cancelled)?;

    println!(
        "{} {}",
        "Result:".green().bold(),
        serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
    );
    Ok(())
}

async fn validate_workflow(file: &str) -> Result<(), EngineError> {
    let bytes = tokio::fs::read(file).await?;
    let workflow = parse_source(&bytes)?;
    println!(
        "{} {} ({} subworkflow(s) besides main)",
        "✓ valid:".green().bold(),
        file,
        workflow.subworkflows.len()
    );
    Ok(())
}

async fn serve(addr: &str, watch: Option<String>) -> Result<(), EngineError> {
    let store = Store::new();

    if let Some(dir) = watch {
        let store = store.clone();
        tokio::spawn(async move {
            nika::deployer::watch(std::path::PathBuf::from(dir), store, std::time::Duration::from_secs(2)).await;
        });
    }

    println!("{} listening on {}", "→".cyan(), addr.cyan().bold());
    nika::api::serve(addr, store).await?;
    Ok(())
}
