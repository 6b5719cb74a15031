//! Command-line surface: bulk seeding, re-keying and verification of exports.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value};

use field_vault::bulk::{read_entries, write_entries, BulkProcessor, BulkReport, ExportFormat};
use field_vault::{ExportEntry, RecordKind, RoleSet};

#[derive(Debug, Parser)]
#[command(
    name = "field-vault",
    version,
    about = "Field-level envelope encryption for resident record exports"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt a plaintext export, each record under its own DEKs.
    Seed(TransformArgs),
    /// Re-encrypt an encrypted export under fresh DEKs.
    Rekey(TransformArgs),
    /// Decrypt an encrypted export as the given roles and report the outcome.
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct TransformArgs {
    /// Record kind (`resident`, `allergies`, `financials`, ...).
    #[arg(long)]
    pub kind: RecordKind,

    /// Input export (JSON array or JSON lines).
    #[arg(long)]
    pub input: PathBuf,

    /// Output export, replaced if it exists.
    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Jsonl)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[arg(long)]
    pub kind: RecordKind,

    /// Encrypted export to check.
    #[arg(long)]
    pub input: PathBuf,

    /// Comma-separated role claims of the simulated caller.
    #[arg(long, value_delimiter = ',', default_value = "ADMIN")]
    pub roles: Vec<String>,
}

/// Layout of files written by `seed` and `rekey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One entry per line.
    Jsonl,
    /// A single JSON array.
    Json,
}

impl From<OutputFormat> for ExportFormat {
    fn from(f: OutputFormat) -> Self {
        match f {
            OutputFormat::Jsonl => ExportFormat::JsonLines,
            OutputFormat::Json => ExportFormat::JsonArray,
        }
    }
}

/// What a command prints to stdout. Carries paths and error codes only.
#[derive(Debug, Serialize)]
pub struct Summary {
    pub operation: &'static str,
    pub kind: String,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailureLine>,
}

#[derive(Debug, Serialize)]
pub struct FailureLine {
    pub path: String,
    pub code: &'static str,
}

impl Summary {
    fn from_report<T>(operation: &'static str, kind: RecordKind, report: &BulkReport<T>) -> Self {
        Self {
            operation,
            kind: kind.to_string(),
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
            failures: report
                .failed
                .iter()
                .map(|f| FailureLine {
                    path: f.path.clone(),
                    code: f.error.code(),
                })
                .collect(),
        }
    }

    /// `true` if every record succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Execute `command` against `processor`.
///
/// # Errors
///
/// Returns an error if an export file cannot be read or written. Per-record
/// failures are reported in the [`Summary`] instead.
pub async fn run(command: Command, processor: &BulkProcessor) -> Result<Summary> {
    match command {
        Command::Seed(args) => {
            let entries: Vec<ExportEntry<Map<String, Value>>> = read_entries(&args.input)
                .await
                .context("failed to read plaintext export")?;
            let report = processor.seed(args.kind, entries).await;
            write_entries(&args.output, &report.succeeded, args.format.into())
                .await
                .context("failed to write encrypted export")?;
            Ok(Summary::from_report("seed", args.kind, &report))
        }
        Command::Rekey(args) => {
            let entries: Vec<ExportEntry> = read_entries(&args.input)
                .await
                .context("failed to read encrypted export")?;
            let report = processor.rekey(args.kind, entries).await;
            write_entries(&args.output, &report.succeeded, args.format.into())
                .await
                .context("failed to write re-keyed export")?;
            Ok(Summary::from_report("rekey", args.kind, &report))
        }
        Command::Verify(args) => {
            let entries: Vec<ExportEntry> = read_entries(&args.input)
                .await
                .context("failed to read encrypted export")?;
            let roles = RoleSet::from_claims(args.roles.iter().map(String::as_str));
            let report = processor.verify(args.kind, entries, &roles).await;
            Ok(Summary::from_report("verify", args.kind, &report))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_seed_with_defaults() {
        let cli = Cli::try_parse_from([
            "field-vault",
            "seed",
            "--kind",
            "allergies",
            "--input",
            "in.jsonl",
            "--output",
            "out.jsonl",
        ])
        .unwrap();
        match cli.command {
            Command::Seed(args) => {
                assert_eq!(args.kind, RecordKind::Allergy);
                assert_eq!(args.format, OutputFormat::Jsonl);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_verify_roles() {
        let cli = Cli::try_parse_from([
            "field-vault",
            "verify",
            "--kind",
            "resident",
            "--input",
            "in.json",
            "--roles",
            "VIEWER,billing",
        ])
        .unwrap();
        match cli.command {
            Command::Verify(args) => assert_eq!(args.roles, vec!["VIEWER", "billing"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let res = Cli::try_parse_from([
            "field-vault",
            "rekey",
            "--kind",
            "invoices",
            "--input",
            "a",
            "--output",
            "b",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn format_maps_to_export_layout() {
        assert_eq!(ExportFormat::from(OutputFormat::Json), ExportFormat::JsonArray);
        assert_eq!(ExportFormat::from(OutputFormat::Jsonl), ExportFormat::JsonLines);
    }
}
