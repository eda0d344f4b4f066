mod script;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scenario_kernel::ActionResult;
use scenario_persist::{Engine, EngineConfig};
use script::Script;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scenario-cli", about = "Drive and inspect scenario simulations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON engine config (defaults are used when absent)
    #[arg(long, env = "SCENARIO_CONFIG")]
    config: Option<PathBuf>,

    /// Bundle store directory, overriding the config
    #[arg(long, env = "SCENARIO_STORE_DIR")]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an action script against a new or saved simulation
    Run {
        /// Script file with constraints, rules and actions
        script: PathBuf,
        /// Seed for a new simulation
        #[arg(short, long)]
        seed: Option<u64>,
        /// Start from this saved bundle instead of a new simulation
        #[arg(short, long)]
        load: Option<String>,
        /// Save the result under this name
        #[arg(long)]
        save: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Fork a saved simulation, optionally run a script on the fork, and save it
    Fork {
        source: String,
        target: String,
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Print the state stored in a bundle
    State { name: String },
    /// Print the action history stored in a bundle
    History {
        name: String,
        /// Only the most recent N events
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List saved bundles, newest first
    List,
    /// Show bundle metadata
    Info { name: String },
    /// Delete a saved bundle
    Delete { name: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = cli.store_dir {
        config.storage_dir = dir;
    }
    let engine = Engine::open(config).context("opening bundle store")?;

    match cli.command {
        Commands::Run {
            script,
            seed,
            load,
            save,
            description,
        } => {
            let script = Script::from_file(&script)?;
            let id = match &load {
                Some(name) => engine.open_bundle(name)?,
                None => engine.create_simulation(seed),
            };
            let results = engine.handle(id)?.with(|sim| script.run(sim))?;
            let rejected = results.iter().filter(|r| !r.success).count();
            info!(simulation_id = %id, actions = results.len(), rejected, "script finished");
            for result in &results {
                print_result(result);
            }
            println!("{}", engine.summary(id)?);
            if let Some(name) = save {
                let info = engine.save(id, &name, &description)?;
                println!(
                    "Saved '{}' (time={}, events={})",
                    info.name, info.time, info.history_count
                );
            }
        }
        Commands::Fork {
            source,
            target,
            script,
        } => {
            let parent = engine.open_bundle(&source)?;
            let child = engine.fork(parent)?;
            if let Some(path) = script {
                let script = Script::from_file(&path)?;
                let results = engine.handle(child)?.with(|sim| script.run(sim))?;
                for result in &results {
                    print_result(result);
                }
            }
            println!("parent: {}", engine.summary(parent)?);
            println!("fork:   {}", engine.summary(child)?);
            engine.save(child, &target, &format!("fork of {source}"))?;
            println!("Saved fork as '{target}'");
        }
        Commands::State { name } => {
            let id = engine.open_bundle(&name)?;
            let state = engine.handle(id)?.with(|sim| sim.state().clone());
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::History { name, limit } => {
            let id = engine.open_bundle(&name)?;
            let events = engine
                .handle(id)?
                .with(|sim| sim.get_history(limit).to_vec());
            for event in events {
                println!(
                    "{} {} {:<16} {} {}",
                    event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                    event.event_id,
                    event.action_name,
                    if event.success { "ok      " } else { "REJECTED" },
                    event.message
                );
            }
        }
        Commands::List => {
            let bundles = engine.list()?;
            if bundles.is_empty() {
                println!("No saved simulations");
            }
            for info in bundles {
                println!(
                    "{:<24} time={:<6} rules={:<3} events={:<5} saved={} {}",
                    info.name,
                    info.time,
                    info.rule_count,
                    info.history_count,
                    info.saved_at.format("%Y-%m-%d %H:%M:%S"),
                    info.description
                );
            }
        }
        Commands::Info { name } => {
            println!("{}", serde_json::to_string_pretty(&engine.info(&name)?)?);
        }
        Commands::Delete { name } => {
            engine.delete(&name)?;
            println!("Deleted '{name}'");
        }
    }

    Ok(())
}

fn print_result(result: &ActionResult) {
    let status = if result.success { "ok" } else { "REJECTED" };
    println!("[t={}] {status}: {}", result.after.time, result.message);
    for v in &result.violations {
        println!("    {}: {}", v.constraint_id, v.message);
    }
    if let Some(report) = &result.rule_report {
        for f in &report.failures {
            println!("    rule {} skipped: {}", f.rule_id, f.message);
        }
    }
}
