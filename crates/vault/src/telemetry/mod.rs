//! Tracing setup: structured JSON logs, with optional span export over OTLP.
//!
//! # Telemetry invariants
//!
//! - **No PII or key material** may appear in any span attribute or log field.
//!   Record paths, kinds, purposes, KEK references and error codes are fine.
//! - Logs go to stderr; stdout carries only the command report.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
