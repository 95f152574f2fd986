// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rag_actions::demo::demo_collaborators;
use rag_actions::register_all;
use rag_cli::commands;
use rag_engine::{Engine, Runtime as EngineRuntime};
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "rag", version, about = "RAG pipeline engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a pipeline against the built-in demo collaborators.
    Run {
        /// Path to the pipeline YAML file.
        pipeline: PathBuf,

        /// The user's question.
        #[arg(long)]
        query: String,

        /// Session identifier.
        #[arg(long, default_value = "cli-session")]
        session_id: String,

        /// Opaque caller identifier.
        #[arg(long, default_value = "rag-cli")]
        consultant: String,

        /// Print the full trace as JSONL instead of just the final answer.
        #[arg(long)]
        trace: bool,
    },

    /// Validate a pipeline file's shape and action references.
    Validate {
        /// Path to the pipeline YAML file.
        pipeline: PathBuf,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    /// PipelineDef schema.
    Pipeline,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { EnvFilter::new("rag=debug") } else { EnvFilter::new("rag=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Run { pipeline, query, session_id, consultant, trace } => {
            cmd_run(&pipeline, query, session_id, consultant, trace).await
        }
        Commands::Validate { pipeline } => cmd_validate(&pipeline),
        Commands::Schema { kind } => cmd_schema(kind),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn cmd_run(
    pipeline_path: &std::path::Path,
    query: String,
    session_id: String,
    consultant: String,
    trace: bool,
) -> Result<()> {
    let pipeline = commands::load_pipeline_file(pipeline_path)?;
    let registry = register_all(demo_collaborators());
    let engine = Engine::new(registry);
    let runtime = EngineRuntime::from_env();

    let outcome = commands::run_pipeline(&engine, &pipeline, query, session_id, consultant, &runtime).await?;

    if trace {
        for event in &outcome.trace {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    match outcome.final_answer {
        Some(answer) => println!("{answer}"),
        None => eprintln!("(pipeline ended without setting a final answer)"),
    }

    Ok(())
}

fn cmd_validate(pipeline_path: &std::path::Path) -> Result<()> {
    let registry = register_all(demo_collaborators());
    let report = commands::validate_pipeline_file(pipeline_path, &registry)
        .with_context(|| format!("validate '{}'", pipeline_path.display()))?;

    println!("pipeline '{}': valid", report.pipeline_name);
    for warning in &report.warnings {
        println!("warning: {warning:?}");
    }
    Ok(())
}

fn cmd_schema(kind: SchemaArg) -> Result<()> {
    let schema = match kind {
        SchemaArg::Pipeline => commands::pipeline_schema(),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
