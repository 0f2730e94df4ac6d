//! Synoptic CLI - weather typing driver
//!
//! # Usage
//!
//! ```bash
//! # Train a model on the configured date range
//! synoptic train --config synoptic.toml
//!
//! # Classify every snapshot present in the input directory
//! synoptic infer --config synoptic.toml
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging level (default: info)

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use synoptic::archive::ModelArchive;
use synoptic::config::EngineConfig;
use synoptic::ingest::{DirectorySource, FeatureAssembler};
use synoptic::pipeline::{run_inference, run_training};
use synoptic::types::{TypeRecord, WinnerAssignment};

#[derive(Parser, Debug)]
#[command(name = "synoptic")]
#[command(about = "SOM-based weather typing engine")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(long, env = "SYNOPTIC_CONFIG", default_value = "synoptic.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model on the configured date range and archive it
    Train,
    /// Classify snapshots in the input directory against the archived model
    Infer,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = EngineConfig::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    match args.command {
        Command::Train => train(&config),
        Command::Infer => infer(&config),
    }
}

fn train(config: &EngineConfig) -> Result<()> {
    let times = config.training_dateseries()?;
    let source = DirectorySource::new(&config.share.input_dir);
    let assembler = FeatureAssembler::new(config.share.variables.clone(), config.share.workers)?;
    let dataset = assembler.assemble(&source, &times)?;

    let output = run_training(&dataset, &config.training)?;

    ModelArchive::save(&output.artifact, &config.share.archive_path)?;
    write_report(&output.report, &config.share.output_dir.join("evaluation.json"))?;
    write_assignment_csv(
        &output.assignments,
        &config.share.output_dir.join("train_cluster.csv"),
    )?;

    info!(
        archive = %config.share.archive_path.display(),
        "training complete"
    );
    Ok(())
}

fn infer(config: &EngineConfig) -> Result<()> {
    let source = DirectorySource::new(&config.share.input_dir);
    let times = source.list_timestamps()?;
    let assembler = FeatureAssembler::new(config.share.variables.clone(), config.share.workers)?;
    let dataset = assembler.assemble(&source, &times)?;

    let artifact = ModelArchive::load(&config.share.archive_path)?;
    let records = run_inference(&dataset, &artifact, &config.inference)?;

    write_inference_csv(
        &records,
        &config.share.output_dir.join("inference_cluster.csv"),
    )?;

    info!(periods = records.len(), "inference complete");
    Ok(())
}

fn create_output_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))
}

fn write_report(report: &synoptic::EvaluationReport, path: &Path) -> Result<()> {
    let file = create_output_file(path)?;
    serde_json::to_writer_pretty(file, report)?;
    info!(path = %path.display(), "wrote evaluation report");
    Ok(())
}

/// Quote a textual CSV field when it contains the delimiter or a quote.
/// Numeric columns are written directly; every textual column in both
/// output tables goes through this.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    csv_field(&ts.format("%Y-%m-%d_%H:%M:%S").to_string())
}

fn write_assignment_csv(assignments: &[WinnerAssignment], path: &Path) -> Result<()> {
    let mut file = create_output_file(path)?;
    writeln!(file, "timestamp,node_x,node_y,type_id")?;
    for a in assignments {
        writeln!(
            file,
            "{},{},{},{}",
            csv_timestamp(&a.timestamp),
            a.node.x,
            a.node.y,
            a.type_id
        )?;
    }
    info!(path = %path.display(), rows = assignments.len(), "wrote training assignments");
    Ok(())
}

fn write_inference_csv(records: &[TypeRecord], path: &Path) -> Result<()> {
    let mut file = create_output_file(path)?;
    let with_match = records.iter().any(|r| r.best_match.is_some());
    if with_match {
        writeln!(file, "timestamp,type2d_cor,type_id,best_match")?;
    } else {
        writeln!(file, "timestamp,type2d_cor,type_id")?;
    }
    for r in records {
        match r.best_match {
            Some(best) => writeln!(
                file,
                "{},{},{},{}",
                csv_timestamp(&r.period_start),
                csv_field(&r.type_coordinate),
                r.type_id,
                csv_timestamp(&best)
            )?,
            None => writeln!(
                file,
                "{},{},{}",
                csv_timestamp(&r.period_start),
                csv_field(&r.type_coordinate),
                r.type_id
            )?,
        }
    }
    info!(path = %path.display(), rows = records.len(), "wrote classification table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_csv_field_quotes_only_when_needed() {
        assert_eq!(csv_field("(1,2)"), "\"(1,2)\"");
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_timestamp_is_unquoted() {
        let ts = chrono::Utc.with_ymd_and_hms(2020, 1, 2, 12, 0, 0).unwrap();
        assert_eq!(csv_timestamp(&ts), "2020-01-02_12:00:00");
    }
}
