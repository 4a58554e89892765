use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tessera_config::{ExecutorDef, ExecutorKind, WorkflowDef};
use tessera_resolver::{Resolver, StandardResolver};
use tessera_runtime::{
  LoggingHandler, RunnableConfig, RunnableStatus, TracingCallbackHandler, Workflow,
};

/// Tessera - a dependency-driven workflow runner for agent pipelines
#[derive(Parser)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.tessera)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow, reading the JSON payload from stdin
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Pool strategy, overriding the workflow file
    #[arg(long, value_enum)]
    executor: Option<ExecutorArg>,

    /// Maximum concurrent nodes, overriding the workflow file
    #[arg(long)]
    max_workers: Option<usize>,

    /// Fail the run after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Write the run trace as JSON. Without a path the trace goes to
    /// <data-dir>/traces/<workflow_id>.json
    #[arg(long, num_args = 0..=1)]
    trace: Option<Option<PathBuf>>,
  },

  /// Check that a workflow file parses and forms a valid graph
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExecutorArg {
  Thread,
  Blocking,
}

impl From<ExecutorArg> for ExecutorKind {
  fn from(arg: ExecutorArg) -> Self {
    match arg {
      ExecutorArg::Thread => ExecutorKind::Thread,
      ExecutorArg::Blocking => ExecutorKind::Blocking,
    }
  }
}

struct RunOptions {
  executor: Option<ExecutorArg>,
  max_workers: Option<usize>,
  timeout_ms: Option<u64>,
  trace: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tessera=info,warn")),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".tessera"),
  };

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      executor,
      max_workers,
      timeout_ms,
      trace,
    }) => {
      let def = load_workflow(&workflow_file)?;
      let trace = trace.map(|path| {
        path.unwrap_or_else(|| default_trace_path(&data_dir, &def.workflow_id))
      });
      let options = RunOptions {
        executor,
        max_workers,
        timeout_ms,
        trace,
      };
      let payload = read_payload_from_stdin()?;

      let rt = tokio::runtime::Runtime::new()?;
      let status = rt.block_on(run_workflow(def, payload, options))?;
      if status != RunnableStatus::Success {
        std::process::exit(1);
      }
    }
    Some(Commands::Validate { workflow_file }) => {
      let def = load_workflow(&workflow_file)?;
      let workflow = StandardResolver::new()
        .resolve(def)
        .context("workflow is invalid")?;
      println!("{}", describe(&workflow));
    }
    None => {
      println!("tessera - use --help to see available commands");
    }
  }

  Ok(())
}

/// One-line summary of a resolved workflow's graph.
fn describe(workflow: &Workflow) -> String {
  let graph = workflow.flow().graph();
  format!(
    "{}: {} nodes, entry points: {}, join points: {}, order: {}",
    workflow.id(),
    workflow.nodes().len(),
    graph.entry_points().join(", "),
    graph.join_points().join(", "),
    graph.topological_order().join(" -> ")
  )
}

fn load_workflow(path: &Path) -> Result<WorkflowDef> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read workflow file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", path.display()))
}

fn default_trace_path(data_dir: &Path, workflow_id: &str) -> PathBuf {
  data_dir.join("traces").join(format!("{}.json", workflow_id))
}

/// Apply command-line overrides to the workflow's executor settings.
fn apply_overrides(mut def: WorkflowDef, options: &RunOptions) -> WorkflowDef {
  if options.executor.is_some() || options.max_workers.is_some() {
    let executor = def.executor.get_or_insert_with(ExecutorDef::default);
    if let Some(kind) = options.executor {
      executor.kind = kind.into();
    }
    if options.max_workers.is_some() {
      executor.max_workers = options.max_workers;
    }
  }
  def
}

async fn run_workflow(
  def: WorkflowDef,
  payload: serde_json::Value,
  options: RunOptions,
) -> Result<RunnableStatus> {
  let def = apply_overrides(def, &options);
  let workflow: Workflow = StandardResolver::new()
    .resolve(def)
    .context("failed to resolve workflow")?;

  let tracer = Arc::new(TracingCallbackHandler::new());
  let mut config = RunnableConfig::new()
    .with_callback(Arc::new(LoggingHandler))
    .with_callback(tracer.clone());
  if let Some(timeout_ms) = options.timeout_ms {
    config = config.with_timeout(Duration::from_millis(timeout_ms));
  }

  let cancel = config.cancellation().clone();
  let interrupt = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt_received");
      cancel.cancel();
    }
  });

  let result = workflow.run(payload, &config).await;
  interrupt.abort();
  let result = result.context("workflow execution failed")?;

  if let Some(path) = &options.trace {
    write_trace(path, &tracer).await?;
  }

  println!("{}", serde_json::to_string_pretty(&result.output)?);
  if let Some(error) = &result.error {
    eprintln!("Workflow failed: {}", error);
  }

  Ok(result.status)
}

async fn write_trace(path: &Path, tracer: &TracingCallbackHandler) -> Result<()> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create trace directory: {}", parent.display()))?;
  }
  let json = tracer.to_json().context("failed to serialize trace")?;
  tokio::fs::write(path, json)
    .await
    .with_context(|| format!("failed to write trace file: {}", path.display()))?;
  tracing::info!(path = %path.display(), "trace_written");
  Ok(())
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tessera_runtime::TraceExport;

  fn write_workflow(dir: &Path) -> PathBuf {
    let path = dir.join("sum.json");
    let def = json!({
      "workflow_id": "sum",
      "name": "Sum",
      "nodes": [
        {"node_id": "a", "type": "pass", "value": {"v": 1}},
        {"node_id": "b", "type": "pass", "value": {"v": 1}},
        {
          "node_id": "c",
          "type": "template",
          "templates": {"v": "{{ a.v + b.v }}"},
          "depends": ["a", "b"]
        }
      ]
    });
    std::fs::write(&path, def.to_string()).unwrap();
    path
  }

  fn options(trace: Option<PathBuf>) -> RunOptions {
    RunOptions {
      executor: Some(ExecutorArg::Blocking),
      max_workers: Some(2),
      timeout_ms: Some(5_000),
      trace,
    }
  }

  #[test]
  fn test_load_workflow_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let err = load_workflow(&missing).unwrap_err();
    assert!(err.to_string().contains("missing.json"));

    let def = load_workflow(&write_workflow(dir.path())).unwrap();
    assert_eq!(def.workflow_id, "sum");
    assert_eq!(def.nodes.len(), 3);
  }

  #[test]
  fn test_overrides_replace_executor() {
    let dir = tempfile::tempdir().unwrap();
    let def = load_workflow(&write_workflow(dir.path())).unwrap();
    let def = apply_overrides(def, &options(None));
    assert_eq!(
      def.executor,
      Some(ExecutorDef {
        kind: ExecutorKind::Blocking,
        max_workers: Some(2),
      })
    );
  }

  #[test]
  fn test_default_trace_path() {
    assert_eq!(
      default_trace_path(Path::new("/data"), "sum"),
      PathBuf::from("/data/traces/sum.json")
    );
  }

  #[test]
  fn test_describe_lists_graph_order() {
    let dir = tempfile::tempdir().unwrap();
    let def = load_workflow(&write_workflow(dir.path())).unwrap();
    let workflow = StandardResolver::new().resolve(def).unwrap();
    assert_eq!(
      describe(&workflow),
      "sum: 3 nodes, entry points: a, b, join points: c, order: a -> b -> c"
    );
  }

  #[tokio::test]
  async fn test_run_writes_trace() {
    let dir = tempfile::tempdir().unwrap();
    let def = load_workflow(&write_workflow(dir.path())).unwrap();
    let trace_path = dir.path().join("traces").join("run.json");

    let status = run_workflow(def, json!({}), options(Some(trace_path.clone())))
      .await
      .unwrap();
    assert_eq!(status, RunnableStatus::Success);

    let trace = TraceExport::from_json(&std::fs::read_to_string(&trace_path).unwrap()).unwrap();
    // workflow run plus three node runs
    assert_eq!(trace.runs.len(), 4);
  }
}
