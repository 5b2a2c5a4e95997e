use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use gatescript::eval::truth_table;
use gatescript::{Document, Evaluator};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatescript", version, about = "Compile, format and run logic-circuit scripts")]
struct Cli {
    /// Log compiler and evaluator activity (same as RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and report diagnostics
    Check { file: PathBuf },
    /// Print the canonical form of a script
    Fmt {
        file: PathBuf,
        /// Rewrite the file in place
        #[arg(long, default_value_t = false)]
        write: bool,
    },
    /// Drive input pins and print every output pin
    Eval {
        file: PathBuf,
        /// Input pin value, `id=0` or `id=1`
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, bool)>,
        #[arg(long, default_value_t = 3)]
        frames: u64,
    },
    /// Print the truth table of a defined gate
    Table {
        file: PathBuf,
        #[arg(long)]
        gate: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn parse_assignment(s: &str) -> Result<(String, bool), String> {
    let (id, value) = s.split_once('=').ok_or_else(|| format!("expected id=0|1, got {s}"))?;
    let value = match value.trim() {
        "0" => false,
        "1" => true,
        other => return Err(format!("value must be 0 or 1, got {other}")),
    };
    Ok((id.trim().to_string(), value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Check { file } => {
            let doc = Document::load(&file)?;
            for diagnostic in doc.diagnostics() {
                println!("{}: {}", file.display(), diagnostic);
            }
            println!(
                "nodes={} connections={} gates={} diagnostics={}",
                doc.graph().node_count(),
                doc.graph().connection_count(),
                doc.registry().len(),
                doc.diagnostics().len()
            );
            if !doc.diagnostics().is_empty() {
                bail!("{} has {} problem(s)", file.display(), doc.diagnostics().len());
            }
        }
        Commands::Fmt { file, write } => {
            let mut doc = Document::load(&file)?;
            for diagnostic in doc.diagnostics() {
                eprintln!("{}: {}", file.display(), diagnostic);
            }
            let text = doc.refresh_script().to_string();
            if write {
                fs::write(&file, &text).with_context(|| format!("writing {}", file.display()))?;
            } else {
                print!("{text}");
            }
        }
        Commands::Eval { file, set, frames } => {
            let mut doc = Document::load(&file)?;
            for diagnostic in doc.diagnostics() {
                eprintln!("{}: {}", file.display(), diagnostic);
            }
            let graph = doc.graph_mut();
            for (id, value) in set {
                let node = graph.find(&id).ok_or_else(|| anyhow!("no node {id}"))?;
                graph.set_input(node, value)?;
            }
            let mut evaluator = Evaluator::new();
            let mut outputs = Vec::new();
            for _ in 0..frames.max(1) {
                outputs = evaluator.tick(graph);
            }
            for (node, value) in outputs {
                let id = graph.node(node).map(|n| n.id.as_str()).unwrap_or_default();
                println!("{id}={}", u8::from(value));
            }
        }
        Commands::Table { file, gate, json } => {
            let doc = Document::load(&file)?;
            let definition = doc
                .registry()
                .get(&gate)
                .ok_or_else(|| anyhow!("gate {gate} is not defined in {}", file.display()))?;
            let table = truth_table(definition, doc.registry())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                print!("{table}");
            }
        }
    }
    Ok(())
}
