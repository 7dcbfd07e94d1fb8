mod logging;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowstage::config::Config;
use flowstage::pipeline::Pipeline;
use flowstage::registry::Registries;
use flowstage::stage::StageKind;
use flowstage::stats::Stats;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "flowstage",
    version,
    about = "Configuration driven stream processing"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to the pipeline JSON file
        config: PathBuf,
    },
    /// List the available stage types
    List,
    /// Show the configuration fields of a stage type
    Docs {
        /// Stage kind: input, processor or output
        kind: StageKind,
        /// Type name, e.g. "redis"
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config } => run(&config).await,
        Commands::List => {
            list();
            Ok(())
        }
        Commands::Docs { kind, name } => docs(kind, &name),
    }
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)?;
    let stats = Stats::new();
    let pipeline = Pipeline::build(&config, Registries::builtin(), stats.clone())?;

    let token = CancellationToken::new();
    let signal = tokio::spawn(flowstage::shutdown_signal(None, token.clone()));

    let result = pipeline.run(token.clone()).await;
    // releases the signal handler once the pipeline ended on its own
    token.cancel();
    signal.await.context("waiting for signal handler")?;

    for (name, value) in stats.snapshot() {
        info!(counter = %name, value, "Final count");
    }
    Ok(result?)
}

fn list() {
    let registries = Registries::builtin();
    for kind in [StageKind::Input, StageKind::Processor, StageKind::Output] {
        println!("{kind}s:");
        for (name, summary) in registries.summaries(kind) {
            println!("  {name:<10} {summary}");
        }
    }
}

fn docs(kind: StageKind, name: &str) -> anyhow::Result<()> {
    let (fields, defaults) = Registries::builtin()
        .docs(kind, name)
        .with_context(|| format!("no {kind} type named {name}"))?;

    println!("{kind} {name}\n");
    for field in fields {
        let mut notes = Vec::new();
        if field.advanced {
            notes.push("advanced".to_string());
        }
        if field.interpolated {
            notes.push("interpolated".to_string());
        }
        if !field.options.is_empty() {
            notes.push(format!("one of: {}", field.options.join(", ")));
        }
        if notes.is_empty() {
            println!("  {}: {}", field.name, field.description);
        } else {
            println!("  {} ({}): {}", field.name, notes.join("; "), field.description);
        }
    }
    println!("\ndefaults:\n{}", serde_json::to_string_pretty(&defaults)?);
    Ok(())
}
