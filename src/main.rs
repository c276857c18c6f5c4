use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reflow_core::config::AppConfig;
use reflow_core::event::EventBus;
use reflow_core::graph::{Graph, NodeKind};

use reflow_engine::loader::{self, LoadOptions};
use reflow_engine::{
    topological_layers, ExecutorRegistry, GraphExecutor, RunId, RunLogger, RunStatus,
};

#[derive(Parser)]
#[command(name = "reflow", version, about = "Iteration-driven workflow graph runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "reflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow definition
    Run {
        /// Workflow file (.yaml, .yml or .json)
        workflow: PathBuf,
        /// Initial message for the start nodes (read from stdin if omitted)
        #[arg(short, long)]
        prompt: Option<String>,
        /// Override the iteration bound
        #[arg(long)]
        max_iterations: Option<usize>,
        /// Workflow variable, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        /// Fail on unresolved ${VAR} placeholders
        #[arg(long)]
        strict_vars: bool,
        /// Directory for the result document (defaults to scheduler.output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Do not write the result document
        #[arg(long)]
        no_save: bool,
    },
    /// Load and validate a workflow without running it
    Validate {
        workflow: PathBuf,
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
        #[arg(long)]
        strict_vars: bool,
    },
    /// Print the dependency layers of a workflow
    Layers {
        workflow: PathBuf,
    },
    /// List workflow definitions in a directory
    List {
        #[arg(default_value = "workflows")]
        dir: PathBuf,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("reflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "reflow", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            workflow,
            prompt,
            max_iterations,
            vars,
            strict_vars,
            output_dir,
            no_save,
        } => {
            let graph = load_graph(&workflow, &config, &vars, strict_vars)?;
            let prompt = match prompt {
                Some(p) => p,
                None => read_stdin()?,
            };
            let output_dir =
                output_dir.unwrap_or_else(|| PathBuf::from(&config.scheduler.output_dir));
            run_workflow(
                graph,
                &config,
                &vars,
                prompt,
                max_iterations,
                (!no_save).then_some(output_dir.as_path()),
            )
            .await?;
        }
        Commands::Validate {
            workflow,
            vars,
            strict_vars,
        } => {
            let graph = load_graph(&workflow, &config, &vars, strict_vars)?;
            println!(
                "{}: {} nodes, {} edges, start {:?}, end {:?}",
                graph.id,
                graph.nodes.len(),
                graph.edges.len(),
                graph.start,
                graph.end
            );
            let sinks = graph.sink_nodes();
            if graph.end.is_empty() && sinks.is_empty() {
                warn!(workflow_id = %graph.id, "No end or sink nodes; runs end only at the iteration bound");
            }
        }
        Commands::Layers { workflow } => {
            let graph = load_graph(&workflow, &config, &[], false)?;
            for (i, layer) in topological_layers(&graph).iter().enumerate() {
                println!("{}: {}", i, layer.join(", "));
            }
        }
        Commands::List { dir } => {
            for name in loader::list_workflows(&dir)? {
                println!("{}", name);
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Variables for `${NAME}` placeholders: process environment, then
/// `[vars]` from the config, then `--var` flags.
fn variables(config: &AppConfig, cli_vars: &[(String, String)]) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = std::env::vars().collect();
    vars.extend(config.vars.clone());
    vars.extend(cli_vars.iter().cloned());
    vars
}

fn load_graph(
    path: &Path,
    config: &AppConfig,
    cli_vars: &[(String, String)],
    strict_vars: bool,
) -> anyhow::Result<Graph> {
    let options = LoadOptions {
        strict_variables: strict_vars,
    };
    let graph = loader::load_path(path, &variables(config, cli_vars), &options)
        .with_context(|| format!("loading workflow {}", path.display()))?;
    info!(workflow_id = %graph.id, nodes = graph.nodes.len(), "Workflow loaded");
    Ok(graph)
}

fn read_stdin() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let input = input.trim().to_string();
    if input.is_empty() {
        bail!("no prompt given; pass --prompt or pipe one on stdin");
    }
    Ok(input)
}

async fn run_workflow(
    graph: Graph,
    config: &AppConfig,
    cli_vars: &[(String, String)],
    prompt: String,
    max_iterations: Option<usize>,
    output_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let mut registry = ExecutorRegistry::with_builtins();
    if graph.nodes.values().any(|n| n.kind == NodeKind::Remote) {
        registry.register(NodeKind::Remote, reflow_llm::create_remote_executor(config)?);
    }

    let shared = config
        .vars
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .chain(
            cli_vars
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone()))),
        )
        .collect();

    let event_bus = Arc::new(EventBus::default());
    let workflow_id = graph.id.clone();
    let executor = GraphExecutor::new(graph, &registry)?
        .with_max_iterations(max_iterations.unwrap_or(config.scheduler.max_iterations))
        .with_shared_context(shared)
        .with_event_bus(event_bus.clone());

    let cancel = CancellationToken::new();
    let logger = config.log.enabled.then(|| {
        RunLogger::new(config.log.dir()).spawn(
            &event_bus,
            workflow_id.clone(),
            RunId::new(),
            cancel.clone(),
        )
    });

    let result = executor.execute(prompt).await;

    if let Some(handle) = logger {
        if tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            cancel.cancel();
        }
    }

    if let Some(dir) = output_dir {
        let path = result.save_results(dir)?;
        info!(path = %path.display(), "Saved run result");
    }

    eprintln!(
        "{} after {} iteration(s) in {:.1}s",
        result.status,
        result.iterations,
        result.elapsed.as_secs_f64()
    );
    if let Some(output) = &result.final_output {
        println!("{}", output.content);
    }

    if result.status == RunStatus::Failed {
        bail!(
            "workflow {} failed: {}",
            workflow_id,
            result.error.unwrap_or_default()
        );
    }
    Ok(())
}
