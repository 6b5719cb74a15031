//! `field-vault` binary entry point.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`Config`] from environment variables.
//! 3. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 4. Build the KMS client (AWS or local) behind the retry/concurrency guard.
//! 5. Build the [`EnvelopeCodec`] and [`BulkProcessor`].
//! 6. Run the command and print its summary.
//! 7. Close the codec and flush telemetry.

mod cli;
mod config;
mod telemetry;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use cli::Cli;
use config::{Config, KmsBackend};
use field_vault::bulk::BulkProcessor;
use field_vault::kms::{AwsKms, GuardedKms, KeyManagementClient, LocalKms};
use field_vault::EnvelopeCodec;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // -----------------------------------------------------------------------
    // 1. Command line
    // -----------------------------------------------------------------------
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = ?cfg.kms_backend,
        "field-vault starting"
    );

    // -----------------------------------------------------------------------
    // 4. KMS client
    // -----------------------------------------------------------------------
    let kms = build_kms(&cfg).await?;

    // -----------------------------------------------------------------------
    // 5. Codec + bulk processor
    // -----------------------------------------------------------------------
    let codec = Arc::new(EnvelopeCodec::new(kms, cfg.kek_ring()));
    let processor = BulkProcessor::new(Arc::clone(&codec), cfg.bulk_concurrency);

    // -----------------------------------------------------------------------
    // 6. Command
    // -----------------------------------------------------------------------
    let outcome = cli::run(cli.command, &processor).await;

    // -----------------------------------------------------------------------
    // 7. Shutdown
    // -----------------------------------------------------------------------
    if let Err(e) = codec.close().await {
        error!(code = e.code(), "failed to close KMS client");
    }

    let summary = match outcome {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            telemetry::shutdown_telemetry();
            return Err(e);
        }
    };

    let rendered =
        serde_json::to_string_pretty(&summary).context("failed to render command summary")?;
    println!("{rendered}");
    info!(
        operation = summary.operation,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "field-vault finished"
    );
    telemetry::shutdown_telemetry();

    Ok(if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn build_kms(cfg: &Config) -> Result<Arc<dyn KeyManagementClient>> {
    let backend: Arc<dyn KeyManagementClient> = match cfg.kms_backend {
        KmsBackend::Aws => Arc::new(AwsKms::connect(cfg.kms_endpoint_url.as_deref()).await),
        KmsBackend::Local => {
            let seed = cfg.local_kek_seed.as_deref().unwrap_or_default();
            let local = LocalKms::from_seed(seed.as_bytes(), cfg.kek_ring().all().cloned())
                .context("failed to initialise local KMS")?;
            Arc::new(local)
        }
    };

    Ok(Arc::new(GuardedKms::new(
        backend,
        cfg.kms_max_concurrency,
        cfg.retry_policy(),
    )))
}
