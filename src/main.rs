use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use osmo_engine::api::workflow_dto::workflow_dto::WorkflowSpecDto;
use osmo_engine::domain::engine::engine::WorkflowEngine;
use osmo_engine::domain::utils::id::WorkflowId;
use osmo_engine::generate_engine;
use osmo_engine::loader::parser::parse_workflow_file;

#[derive(Parser)]
#[command(name = "osmo-engine", version, about = "Workflow execution engine: validation and admission planning")]
struct Cli {
    /// Engine configuration (settings, nodes, pools) as JSON.
    #[arg(short, long, default_value = "src/data/engine.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validates workflow files and prints their dependency layers.
    Validate {
        #[arg(required = true)]
        workflows: Vec<String>,
    },
    /// Submits workflow files and runs one scheduling pass against the configured cluster.
    Plan {
        #[arg(required = true)]
        workflows: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut engine = generate_engine(&cli.config, None).with_context(|| format!("cannot build engine from '{}'", cli.config))?;

    match cli.command {
        Command::Validate { workflows } => validate(&mut engine, &workflows),
        Command::Plan { workflows } => plan(&mut engine, &workflows),
    }
}

fn submit(engine: &mut WorkflowEngine, path: &str) -> anyhow::Result<WorkflowId> {
    let dto: WorkflowSpecDto = parse_workflow_file(path).with_context(|| format!("cannot read '{}'", path))?;
    let id = engine.submit(&dto).with_context(|| format!("'{}' was rejected", path))?;
    Ok(id)
}

fn validate(engine: &mut WorkflowEngine, paths: &[String]) -> anyhow::Result<()> {
    let mut invalid = 0;
    for path in paths {
        match submit(engine, path) {
            Ok(id) => {
                let run = engine.workflow(&id)?;
                println!("{}: valid ({} groups, {} tasks, pool '{}')", path, run.spec.groups.len(), run.spec.tasks.len(), run.spec.pool);
                for (depth, layer) in run.spec.graph.layers.iter().enumerate() {
                    let names: Vec<&str> = layer.iter().map(|g| g.as_str()).collect();
                    println!("  layer {}: {}", depth, names.join(", "));
                }
            }
            Err(e) => {
                invalid += 1;
                println!("{}: {:#}", path, e);
            }
        }
    }
    if invalid > 0 {
        bail!("{} of {} workflows are invalid", invalid, paths.len());
    }
    Ok(())
}

fn plan(engine: &mut WorkflowEngine, paths: &[String]) -> anyhow::Result<()> {
    for path in paths {
        let id = submit(engine, path)?;
        println!("submitted {} as {}", path, id);
    }

    let report = engine.schedule()?;
    for unit in &report.admitted {
        println!("admitted {}/{}", unit.workflow, unit.group);
        for placement in &unit.placements {
            println!("  {} -> {} ({}) {}", placement.task.task, placement.node, placement.platform, placement.request);
        }
    }
    for unit in &report.pending {
        println!("pending  {}/{}: {}", unit.workflow, unit.group, unit.reason);
    }
    for pool in engine.pools().pools.keys() {
        let usage = engine.ledger().pool_usage(pool);
        println!("pool {}: non-preemptible {}, preemptible {}", pool, usage.non_preemptible, usage.preemptible);
    }
    Ok(())
}
