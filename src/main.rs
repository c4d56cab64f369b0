use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parley_core::config::{load_participants, AppConfig};
use parley_core::types::ChatMessage;
use parley_flow::{
    loop_chat_flow, round_robin_flow, validate, FlowEngine, FlowGraph, StepReport, Transition,
};

#[derive(Parser)]
#[command(name = "parley", version, about = "Run structured multi-party conversation flows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow to completion and print the produced messages
    Run {
        #[command(flatten)]
        flow: FlowArgs,
        /// Print the final context as JSON
        #[arg(long)]
        json: bool,
    },
    /// Step through a flow interactively
    Step {
        #[command(flatten)]
        flow: FlowArgs,
    },
    /// Statically check a graph definition
    Validate {
        /// Path to a JSON graph definition
        graph: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a built-in flow as JSON
    Preset {
        #[command(subcommand)]
        preset: Preset,
    },
    /// Show current configuration
    Config,
}

#[derive(Args)]
struct FlowArgs {
    /// Path to a JSON graph definition (defaults to [flow].graph)
    graph: Option<PathBuf>,
    /// Path to a JSON participant roster
    #[arg(short, long)]
    participants: Option<PathBuf>,
    /// Initial variable binding; VALUE is JSON, or a plain string
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,
    /// Override [engine].max_steps
    #[arg(long)]
    max_steps: Option<usize>,
}

#[derive(Subcommand)]
enum Preset {
    /// Prompt, check the round counter, repeat
    LoopChat {
        #[arg(long, default_value = "3")]
        rounds: u32,
    },
    /// One turn per participant per round
    RoundRobin {
        /// Participant ids in speaking order
        #[arg(required = true)]
        participants: Vec<String>,
        #[arg(long, default_value = "1")]
        rounds: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    // Initialize tracing
    let default_filter = config
        .log
        .as_ref()
        .and_then(|l| l.filter.clone())
        .unwrap_or_else(|| "parley=info,warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run { flow, json } => {
            let mut engine = prepare_engine(&config, &flow)?;
            let summary = match engine.run_to_completion() {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Flow run aborted");
                    return Err(e.into());
                }
            };

            if json {
                let output = serde_json::json!({
                    "summary": summary,
                    "context": engine.context(),
                    "diagnostics": engine.diagnostics(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for message in engine.messages() {
                    print_message(message);
                }
                println!(
                    "\n--- {} steps, {} messages, {} diagnostics",
                    summary.steps, summary.messages, summary.diagnostics
                );
            }
        }
        Commands::Step { flow } => {
            let mut engine = prepare_engine(&config, &flow)?;
            run_stepper(&mut engine)?;
        }
        Commands::Validate { graph, json } => {
            let flow = load_graph(&graph)?;
            let report = validate(&flow);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for issue in &report.issues {
                    println!("{}", issue);
                }
                println!(
                    "{} nodes ({} reachable), {} edges",
                    report.stats.total_nodes, report.stats.reachable_nodes, report.stats.total_edges
                );
            }
            let errors = report.errors().count();
            if errors > 0 {
                bail!("{} has {} error(s)", graph.display(), errors);
            }
        }
        Commands::Preset { preset } => {
            let graph = match preset {
                Preset::LoopChat { rounds } => loop_chat_flow(rounds)?,
                Preset::RoundRobin {
                    participants,
                    rounds,
                } => {
                    let ids: Vec<&str> = participants.iter().map(String::as_str).collect();
                    round_robin_flow(&ids, rounds)?
                }
            };
            println!("{}", graph.to_json_pretty()?);
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_graph(path: &Path) -> anyhow::Result<FlowGraph> {
    FlowGraph::load(path).with_context(|| format!("Failed to load graph {}", path.display()))
}

/// Build an engine from CLI arguments layered over the config file.
fn prepare_engine(config: &AppConfig, args: &FlowArgs) -> anyhow::Result<FlowEngine> {
    let graph_path = args
        .graph
        .clone()
        .or_else(|| config.graph_path())
        .ok_or_else(|| anyhow!("No graph given. Pass GRAPH or set [flow].graph in the config"))?;
    let graph = load_graph(&graph_path)?;
    build_engine(config, graph, &graph_path, args)
}

/// Validate `graph` if configured, then apply the roster, step limit and variables.
fn build_engine(
    config: &AppConfig,
    graph: FlowGraph,
    source: &Path,
    args: &FlowArgs,
) -> anyhow::Result<FlowEngine> {
    if config.engine.validate_before_run {
        let report = validate(&graph);
        for issue in report.warnings() {
            warn!("{}", issue);
        }
        if !report.is_valid() {
            for issue in report.errors() {
                error!("{}", issue);
            }
            bail!("{} failed validation", source.display());
        }
    }

    let participants = match (&args.participants, &config.flow) {
        (Some(path), _) => load_participants(path)
            .with_context(|| format!("Failed to load participants {}", path.display()))?,
        (None, Some(flow)) => flow.load_participants()?,
        (None, None) => Vec::new(),
    };

    let mut engine_config = config.engine.clone();
    if let Some(max_steps) = args.max_steps {
        engine_config.max_steps = max_steps;
    }

    info!(
        graph = %source.display(),
        participants = participants.len(),
        "Loaded flow"
    );
    let mut engine = FlowEngine::new(graph, participants).with_config(engine_config);

    if let Some(flow) = &config.flow {
        for (name, value) in &flow.variables {
            engine.set_variable(name.clone(), value.clone());
        }
    }
    for var in &args.vars {
        let (name, value) = parse_var(var)?;
        engine.set_variable(name, value);
    }

    Ok(engine)
}

/// Parse `KEY=VALUE`. The value is read as JSON when it parses, else kept as a string.
fn parse_var(input: &str) -> anyhow::Result<(String, Value)> {
    let (name, raw) = input
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", input))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Variable name is empty in '{}'", input);
    }
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

fn print_message(message: &ChatMessage) {
    match &message.assistant_id {
        Some(id) => println!("[{} {}] {}", message.role, id, message.text()),
        None => println!("[{}] {}", message.role, message.text()),
    }
}

fn print_report(engine: &FlowEngine, report: &StepReport) {
    println!("{} ({})", report.node_id, report.node_type);
    if let Some(ref id) = report.message_id {
        if let Some(message) = engine.messages().iter().find(|m| &m.id == id) {
            print!("  ");
            print_message(message);
        }
    }
    for d in &report.diagnostics {
        println!("  ! {}", d);
    }
    match &report.transition {
        Transition::Advanced { edge_id, target } => println!("  -> {} via {}", target, edge_id),
        Transition::Ended => println!("  finished (end node)"),
        Transition::DeadEnd => println!("  finished (dead end)"),
    }
}

fn run_stepper(engine: &mut FlowEngine) -> anyhow::Result<()> {
    println!("Parley v{}", env!("CARGO_PKG_VERSION"));
    println!("Enter steps, 'set KEY=VALUE' binds a variable, 'vars' lists them, 'quit' exits.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        let position = engine.current_node_id().unwrap_or("start");
        print!("[{}]> ", position);
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let input = input.trim();

        match input.split_once(' ').map_or(input, |(cmd, _)| cmd) {
            "" | "step" | "s" => {
                let report = if engine.is_started() {
                    engine.step()
                } else {
                    engine.start().map(Some)
                };
                let finished = match report {
                    Ok(Some(report)) => {
                        print_report(engine, &report);
                        report.transition.is_terminal()
                    }
                    Ok(None) => {
                        println!("Flow already finished.");
                        true
                    }
                    Err(e) => {
                        error!(error = %e, "Flow run aborted");
                        return Err(e.into());
                    }
                };
                if finished {
                    println!(
                        "\n--- {} steps, {} messages, {} diagnostics",
                        engine.history().len(),
                        engine.messages().len(),
                        engine.diagnostics().len()
                    );
                    break;
                }
            }
            "set" => match input.strip_prefix("set").map(str::trim).map(parse_var) {
                Some(Ok((name, value))) => {
                    println!("{} = {}", name, value);
                    engine.set_variable(name, value);
                }
                Some(Err(e)) => println!("{}", e),
                None => println!("Usage: set KEY=VALUE"),
            },
            "vars" => {
                let mut vars: Vec<_> = engine.variables().iter().collect();
                vars.sort_by(|a, b| a.0.cmp(b.0));
                if vars.is_empty() {
                    println!("(no variables)");
                }
                for (name, value) in vars {
                    println!("{} = {}", name, value);
                }
            }
            "history" => println!("{}", engine.history().join(" -> ")),
            "quit" | "exit" | "q" => {
                println!("Run abandoned.");
                break;
            }
            other => println!("Unknown command '{}'", other),
        }
    }

    Ok(())
}
