//! `autoflow` command line runner.
//!
//! Loads workflow definitions from JSON files, runs one execution to a
//! terminal state and prints the final record with its log. Executions are
//! persisted to PostgreSQL when `AUTOFLOW_DATABASE_URL` is set and kept in
//! memory otherwise.

mod config;
mod db;
mod error;
mod file_store;

use autoflow_core::{UserId, WorkflowId};
use autoflow_workflow::{
    Engine, ExecutionStatus, ExecutionStore, ExecutorRegistry, MemoryExecutionStore,
    WorkflowStatus, validate,
};
use clap::{Parser, Subcommand};
use crate::config::RunnerConfig;
use crate::db::{PgExecutionStore, PgQueryRunner};
use crate::error::RunnerError;
use crate::file_store::{FileWorkflowStore, read_definition};
use serde_json::{Value as JsonValue, json};
use sqlx::postgres::PgPoolOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Autoflow - run workflow graphs from the command line
#[derive(Parser)]
#[command(name = "autoflow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and print the finished execution
    Run {
        /// Workflow definition file, or a directory of them
        path: PathBuf,

        /// Workflow id to run when PATH is a directory
        #[arg(long)]
        workflow: Option<String>,

        /// Input data as a JSON document
        #[arg(long, default_value = "{}")]
        input: String,

        /// User the execution is recorded for (default: a fresh id)
        #[arg(long)]
        user: Option<String>,

        /// Run a definition that is not marked active
        #[arg(long)]
        force: bool,
    },

    /// Check a workflow definition without running it
    Validate {
        /// Workflow definition file
        workflow_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            path,
            workflow,
            input,
            user,
            force,
        } => run(&path, workflow.as_deref(), &input, user.as_deref(), force).await,
        Commands::Validate { workflow_file } => check(&workflow_file).await,
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(report) => {
            error!(error = %report, "autoflow failed");
            eprintln!("error: {report}");
            ExitCode::from(2)
        }
    }
}

/// Runs one workflow. Returns whether the execution succeeded.
async fn run(
    path: &Path,
    workflow: Option<&str>,
    input: &str,
    user: Option<&str>,
    force: bool,
) -> autoflow_core::Result<bool, RunnerError> {
    let config = RunnerConfig::from_env().map_err(|e| RunnerError::Config {
        details: e.to_string(),
    })?;
    info!("Loaded configuration");

    let input_data: JsonValue = serde_json::from_str(input).map_err(|e| RunnerError::Argument {
        details: format!("--input is not valid JSON: {e}"),
    })?;
    let user_id = match user {
        Some(user) => UserId::from_str(user).map_err(|e| RunnerError::Argument {
            details: format!("--user: {e}"),
        })?,
        None => UserId::new(),
    };

    let (mut workflows, workflow_id) = load_workflows(path, workflow).await?;
    if force {
        workflows
            .set_status(workflow_id, WorkflowStatus::Active)
            .map_err(|e| RunnerError::Workflow {
                details: e.to_string(),
            })?;
    }

    let mut registry = ExecutorRegistry::with_builtins();
    let store: Arc<dyn ExecutionStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(|e| RunnerError::Database {
                    details: e.to_string(),
                })?;
            let store = PgExecutionStore::new(pool.clone());
            info!("Running database migrations...");
            store.migrate().await.map_err(|e| RunnerError::Database {
                details: e.to_string(),
            })?;
            registry = registry.with_query_runner(Arc::new(PgQueryRunner::new(pool)));
            Arc::new(store)
        }
        None => {
            info!("No database configured, keeping executions in memory");
            Arc::new(MemoryExecutionStore::new())
        }
    };

    let engine = Engine::new(registry, store).with_config(config.engine);
    let execution_id = engine
        .execute(&workflows, workflow_id, user_id, input_data)
        .await
        .map_err(|e| RunnerError::Engine {
            details: e.to_string(),
        })?;
    info!(%execution_id, %workflow_id, "Execution started");

    let waited = tokio::select! {
        finished = engine.wait(execution_id) => finished,
        _ = tokio::signal::ctrl_c() => {
            warn!(%execution_id, "Interrupted, cancelling execution");
            engine.cancel(execution_id).await;
            engine.wait(execution_id).await
        }
    };
    let finished = waited.map_err(|e| RunnerError::Engine {
        details: e.to_string(),
    })?;

    let logs = engine.logs(execution_id).unwrap_or_default();
    let report = json!({ "execution": finished, "logs": logs });
    let rendered = serde_json::to_string_pretty(&report).map_err(|e| RunnerError::Engine {
        details: e.to_string(),
    })?;
    println!("{rendered}");

    info!(
        %execution_id,
        status = finished.status.as_str(),
        duration_ms = finished.duration_ms,
        "Execution finished"
    );
    Ok(finished.status == ExecutionStatus::Success)
}

/// Loads the definitions under `path` and picks the one to run.
async fn load_workflows(
    path: &Path,
    workflow: Option<&str>,
) -> autoflow_core::Result<(FileWorkflowStore, WorkflowId), RunnerError> {
    let workflow_error = |details: String| RunnerError::Workflow { details };

    if path.is_dir() {
        let workflows = FileWorkflowStore::open_dir(path)
            .await
            .map_err(|e| workflow_error(e.to_string()))?;
        if workflows.is_empty() {
            return Err(workflow_error(format!(
                "no workflow definitions in {}",
                path.display()
            ))
            .into());
        }
        let Some(workflow) = workflow else {
            return Err(RunnerError::Argument {
                details: format!(
                    "{} holds {} workflows; pick one with --workflow",
                    path.display(),
                    workflows.len()
                ),
            }
            .into());
        };
        let workflow_id = WorkflowId::from_str(workflow).map_err(|e| RunnerError::Argument {
            details: format!("--workflow: {e}"),
        })?;
        return Ok((workflows, workflow_id));
    }

    let definition = read_definition(path)
        .await
        .map_err(|e| workflow_error(e.to_string()))?;
    let mut workflows = FileWorkflowStore::new();
    let workflow_id = workflows
        .insert(definition, path.to_path_buf())
        .map_err(|e| workflow_error(e.to_string()))?;
    Ok((workflows, workflow_id))
}

/// Validates one definition file and prints every problem found.
async fn check(workflow_file: &Path) -> autoflow_core::Result<bool, RunnerError> {
    let definition = read_definition(workflow_file)
        .await
        .map_err(|e| RunnerError::Workflow {
            details: e.to_string(),
        })?;
    let graph = definition.graph().map_err(|e| RunnerError::Workflow {
        details: e.to_string(),
    })?;

    match validate(&graph) {
        Ok(()) => {
            println!(
                "{}: ok ({} nodes, {} connections)",
                workflow_file.display(),
                graph.node_count(),
                definition.connections.len()
            );
            Ok(true)
        }
        Err(errors) => {
            for error in &errors {
                println!("{}: {error}", workflow_file.display());
            }
            Ok(false)
        }
    }
}
