mod batch;
mod config;
mod logging;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::UnreachableArg;
use flowmend_core::{MendConfig, validate_graph};
use flowmend_extract::{decode_graph, extract, mend_text};
use serde_json::json;
use tracing::info;

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "flowmend",
    about = "Recover, validate and repair generated process graphs"
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the repair iteration cap
    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    /// Override what happens to unreachable nodes
    #[arg(long, global = true, value_enum)]
    unreachable: Option<UnreachableArg>,

    /// Also write JSON logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract the structured value from generated text
    Extract {
        /// Input file, or `-` for stdin
        input: PathBuf,
    },
    /// Report graph violations without repairing anything
    Validate {
        /// Input file, or `-` for stdin
        input: PathBuf,
    },
    /// Run the validate/repair loop and print the full report
    Repair {
        /// Input file, or `-` for stdin
        input: PathBuf,

        /// Write the report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Exit with status 2 if the graph could not be fully repaired
        #[arg(long)]
        strict: bool,
    },
    /// Repair every .txt/.json file in a directory and summarize
    Batch {
        dir: PathBuf,

        /// Where to write the JSON summary
        #[arg(long, default_value = "flowmend-results")]
        results_dir: PathBuf,
    },
}

// ── Helpers ─────────────────────────────────────────────────────

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read input: {}", input.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Commands ────────────────────────────────────────────────────

fn cmd_extract(input: &Path) -> Result<ExitCode> {
    let text = read_input(input)?;
    let extraction = extract(&text)?;
    print_json(&json!({
        "recovery": extraction.recovery,
        "degraded": extraction.is_degraded(),
        "value": extraction.value,
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(input: &Path, config: &MendConfig) -> Result<ExitCode> {
    let text = read_input(input)?;
    let extraction = extract(&text)?;
    let decoded = decode_graph(&extraction.value)?;
    let report = validate_graph(&decoded.graph, &config.fields);
    print_json(&json!({
        "valid": report.valid,
        "errors": report.errors().collect::<Vec<_>>(),
        "warnings": report.warnings().collect::<Vec<_>>(),
        "decodeWarnings": decoded.warnings,
    }))?;
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn cmd_repair(
    input: &Path,
    output: Option<&Path>,
    strict: bool,
    config: &MendConfig,
) -> Result<ExitCode> {
    let text = read_input(input)?;
    let report = mend_text(&text, config)?;
    let rendered = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(if strict && !report.run.is_success() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn cmd_batch(dir: &Path, results_dir: &Path, config: &MendConfig) -> Result<ExitCode> {
    let inputs = batch::discover_inputs(dir)?;
    if inputs.is_empty() {
        anyhow::bail!("No .txt or .json files found in {}", dir.display());
    }

    println!("flowmend batch — {} file(s)\n", inputs.len());
    let entries = batch::run_batch(&inputs, config);
    for entry in &entries {
        println!("{}", batch::scorecard_line(entry));
    }

    let passed = entries.iter().filter(|e| e.passed()).count();
    println!("\n  Overall: {}/{}", passed, entries.len());

    let path = batch::write_summary(results_dir, config, &entries)?;
    println!("  Results written to: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

// ── Main ────────────────────────────────────────────────────────

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(cli.log_dir.as_deref())?;

    let config = config::apply_overrides(
        config::load_config(cli.config.as_deref())?,
        cli.max_iterations,
        cli.unreachable,
    );

    match &cli.command {
        Command::Extract { input } => cmd_extract(input),
        Command::Validate { input } => cmd_validate(input, &config),
        Command::Repair {
            input,
            output,
            strict,
        } => cmd_repair(input, output.as_deref(), *strict, &config),
        Command::Batch { dir, results_dir } => cmd_batch(dir, results_dir, &config),
    }
}
