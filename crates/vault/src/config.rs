//! Configuration loading and validation for the `field-vault` binary.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use field_vault::{kms::RetryPolicy, kms::KekRef, KekRing};

/// Which KMS implementation wraps DEKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KmsBackend {
    /// AWS KMS via the default credential chain.
    Aws,
    /// In-process KEKs derived from `LOCAL_KEK_SEED`. Development and seeding only.
    Local,
}

/// Validated configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// KEK for `general` fields. **Required.**
    pub kek_general_path: KekRef,

    /// KEK for `contact` fields. **Required.**
    pub kek_contact_path: KekRef,

    /// KEK for `clinical` fields. **Required.**
    pub kek_clinical_path: KekRef,

    /// KEK for `financial` fields. **Required.**
    pub kek_financial_path: KekRef,

    #[serde(default = "default_kms_backend")]
    pub kms_backend: KmsBackend,

    /// Endpoint override for AWS KMS (VPC endpoint, LocalStack).
    #[serde(default)]
    pub kms_endpoint_url: Option<String>,

    /// Seed for the local backend. Required when `KMS_BACKEND=local`.
    #[serde(default)]
    pub local_kek_seed: Option<String>,

    /// Attempts per KMS call, including the first.
    #[serde(default = "default_kms_max_attempts")]
    pub kms_max_attempts: u32,

    #[serde(default = "default_kms_initial_backoff_ms")]
    pub kms_initial_backoff_ms: u64,

    #[serde(default = "default_kms_max_backoff_ms")]
    pub kms_max_backoff_ms: u64,

    /// In-flight KMS calls allowed at once.
    #[serde(default = "default_kms_max_concurrency")]
    pub kms_max_concurrency: usize,

    /// Records processed concurrently by bulk commands.
    #[serde(default = "default_bulk_concurrency")]
    pub bulk_concurrency: usize,

    /// OTLP endpoint. Span export is disabled when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("kek_general_path", &self.kek_general_path)
            .field("kek_contact_path", &self.kek_contact_path)
            .field("kek_clinical_path", &self.kek_clinical_path)
            .field("kek_financial_path", &self.kek_financial_path)
            .field("kms_backend", &self.kms_backend)
            .field("kms_endpoint_url", &self.kms_endpoint_url)
            .field(
                "local_kek_seed",
                &self.local_kek_seed.as_ref().map(|_| "[REDACTED]"),
            )
            .field("kms_max_attempts", &self.kms_max_attempts)
            .field("kms_initial_backoff_ms", &self.kms_initial_backoff_ms)
            .field("kms_max_backoff_ms", &self.kms_max_backoff_ms)
            .field("kms_max_concurrency", &self.kms_max_concurrency)
            .field("bulk_concurrency", &self.bulk_concurrency)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn default_kms_backend() -> KmsBackend {
    KmsBackend::Aws
}
fn default_kms_max_attempts() -> u32 {
    5
}
fn default_kms_initial_backoff_ms() -> u64 {
    100
}
fn default_kms_max_backoff_ms() -> u64 {
    5_000
}
fn default_kms_max_concurrency() -> usize {
    32
}
fn default_bulk_concurrency() -> usize {
    16
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// The purpose → KEK assignment.
    pub fn kek_ring(&self) -> KekRing {
        KekRing::new(
            self.kek_general_path.clone(),
            self.kek_contact_path.clone(),
            self.kek_clinical_path.clone(),
            self.kek_financial_path.clone(),
        )
    }

    /// Backoff policy for transient KMS failures.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.kms_max_attempts,
            initial_backoff: Duration::from_millis(self.kms_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.kms_max_backoff_ms),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(self.kek_general_path.as_str(), "KEK_GENERAL_PATH")?;
        ensure_non_empty(self.kek_contact_path.as_str(), "KEK_CONTACT_PATH")?;
        ensure_non_empty(self.kek_clinical_path.as_str(), "KEK_CLINICAL_PATH")?;
        ensure_non_empty(self.kek_financial_path.as_str(), "KEK_FINANCIAL_PATH")?;

        let mut keks: Vec<_> = self.kek_ring().all().cloned().collect();
        keks.sort();
        keks.dedup();
        if keks.len() != 4 {
            anyhow::bail!("each purpose must use a distinct KEK_*_PATH");
        }

        if self.kms_backend == KmsBackend::Local {
            ensure_non_empty(
                self.local_kek_seed.as_deref().unwrap_or_default(),
                "LOCAL_KEK_SEED",
            )?;
        }
        if self.kms_max_attempts == 0 {
            anyhow::bail!("KMS_MAX_ATTEMPTS must be >= 1");
        }
        if self.kms_initial_backoff_ms > self.kms_max_backoff_ms {
            anyhow::bail!("KMS_INITIAL_BACKOFF_MS must not exceed KMS_MAX_BACKOFF_MS");
        }
        if self.kms_max_concurrency == 0 {
            anyhow::bail!("KMS_MAX_CONCURRENCY must be >= 1");
        }
        if self.bulk_concurrency == 0 {
            anyhow::bail!("BULK_CONCURRENCY must be >= 1");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
