//! Bulk seeding, re-keying and verification of exported records.
//!
//! Records are processed concurrently up to a fixed bound, each with its own
//! DEKs. A failing record is recorded in the [`BulkReport`] and never aborts
//! the batch. Output order matches input order.

pub mod export;

pub use export::{read_entries, write_entries, BulkError, ExportFormat};

use std::{collections::BTreeMap, future::Future, sync::Arc};

use common::{EncryptedRecord, ExportEntry, VaultError};
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::access::RoleSet;
use crate::codec::{EnvelopeCodec, PlaintextRecord};
use crate::schema::RecordKind;

/// A record that failed during a bulk operation.
#[derive(Debug)]
pub struct BulkFailure {
    /// Document path of the record.
    pub path: String,
    /// Why it failed.
    pub error: VaultError,
}

/// Outcome of a bulk operation.
#[derive(Debug)]
pub struct BulkReport<T> {
    /// Successfully processed entries, in input order.
    pub succeeded: Vec<ExportEntry<T>>,
    /// Failed entries, in input order.
    pub failed: Vec<BulkFailure>,
}

impl<T> BulkReport<T> {
    /// `true` if no record failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Failure counts keyed by [`VaultError::code`].
    pub fn failures_by_code(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for f in &self.failed {
            *counts.entry(f.error.code()).or_insert(0) += 1;
        }
        counts
    }
}

/// Runs codec operations over many records.
pub struct BulkProcessor {
    codec: Arc<EnvelopeCodec>,
    concurrency: usize,
}

impl BulkProcessor {
    /// Process at most `concurrency` records at a time.
    pub fn new(codec: Arc<EnvelopeCodec>, concurrency: usize) -> Self {
        Self {
            codec,
            concurrency: concurrency.max(1),
        }
    }

    /// Encrypt plaintext entries, each under its own fresh DEKs.
    pub async fn seed(
        &self,
        kind: RecordKind,
        entries: Vec<ExportEntry<Map<String, Value>>>,
    ) -> BulkReport<EncryptedRecord> {
        let codec = &self.codec;
        self.run("seed", kind, entries, move |fields| async move {
            codec
                .to_encrypted_record(&PlaintextRecord::new(kind, fields))
                .await
        })
        .await
    }

    /// Decrypt and re-encrypt encrypted entries under fresh DEKs.
    pub async fn rekey(
        &self,
        kind: RecordKind,
        entries: Vec<ExportEntry>,
    ) -> BulkReport<EncryptedRecord> {
        let codec = &self.codec;
        self.run("rekey", kind, entries, move |stored| async move {
            codec.rekey(kind, &stored).await
        })
        .await
    }

    /// Decrypt encrypted entries as a caller holding `roles`.
    pub async fn verify(
        &self,
        kind: RecordKind,
        entries: Vec<ExportEntry>,
        roles: &RoleSet,
    ) -> BulkReport<Map<String, Value>> {
        let codec = &self.codec;
        self.run("verify", kind, entries, move |stored| async move {
            codec
                .from_encrypted_record(kind, &stored, roles)
                .await
                .map(PlaintextRecord::into_fields)
        })
        .await
    }

    async fn run<I, O, F, Fut>(
        &self,
        op: &'static str,
        kind: RecordKind,
        entries: Vec<ExportEntry<I>>,
        f: F,
    ) -> BulkReport<O>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, VaultError>>,
    {
        let total = entries.len();
        info!(op, kind = %kind, total, concurrency = self.concurrency, "bulk operation started");

        let results: Vec<(String, Result<O, VaultError>)> = stream::iter(entries)
            .map(|entry| {
                let pending = f(entry.data);
                let path = entry.path;
                async move { (path, pending.await) }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BulkReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (path, result) in results {
            match result {
                Ok(data) => report.succeeded.push(ExportEntry { path, data }),
                Err(error) => {
                    warn!(op, path = %path, code = error.code(), "record failed");
                    report.failed.push(BulkFailure { path, error });
                }
            }
        }

        info!(
            op,
            kind = %kind,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "bulk operation finished"
        );
        report
    }
}
