//! Reading and writing `{path, data}` export files.
//!
//! Two layouts are supported: line-delimited JSON (one entry per line, the
//! default) and a single JSON array. Readers detect the layout from the first
//! non-whitespace byte.

use std::path::{Path, PathBuf};

use common::ExportEntry;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

/// On-disk layout of an export file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON entry per line.
    #[default]
    JsonLines,
    /// One JSON array of entries.
    JsonArray,
}

/// Errors reading or writing export files.
///
/// Parse errors carry only a position and category; serde's own message can
/// quote record content.
#[derive(Debug, Error)]
pub enum BulkError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An entry is not valid JSON or not a `{path, data}` object.
    #[error("{path}: invalid entry at line {line}, column {column} ({category})")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// 1-based line in the file.
        line: usize,
        /// 1-based column in the line.
        column: usize,
        /// `syntax`, `data`, `eof` or `io`.
        category: &'static str,
    },

    /// Entries could not be serialised.
    #[error("failed to serialise entries for {path}: {reason}")]
    Serialize {
        /// File involved.
        path: PathBuf,
        /// Serializer diagnostic.
        reason: String,
    },
}

fn parse_error(path: &Path, line_offset: usize, e: &serde_json::Error) -> BulkError {
    use serde_json::error::Category;
    BulkError::Parse {
        path: path.to_owned(),
        line: line_offset + e.line(),
        column: e.column(),
        category: match e.classify() {
            Category::Io => "io",
            Category::Syntax => "syntax",
            Category::Data => "data",
            Category::Eof => "eof",
        },
    }
}

/// Read every entry from `path`.
///
/// # Errors
///
/// Returns [`BulkError::Io`] if the file cannot be read, or
/// [`BulkError::Parse`] for the first malformed entry.
pub async fn read_entries<T: DeserializeOwned>(
    path: &Path,
) -> Result<Vec<ExportEntry<T>>, BulkError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| BulkError::Io {
            path: path.to_owned(),
            source,
        })?;

    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text).map_err(|e| parse_error(path, 0, &e));
    }

    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|e| parse_error(path, idx, &e))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Write `entries` to `path` in `format`, replacing any existing file.
///
/// # Errors
///
/// Returns [`BulkError::Io`] on filesystem failure or
/// [`BulkError::Serialize`] if an entry cannot be serialised.
pub async fn write_entries<T: Serialize>(
    path: &Path,
    entries: &[ExportEntry<T>],
    format: ExportFormat,
) -> Result<(), BulkError> {
    let io = |source| BulkError::Io {
        path: path.to_owned(),
        source,
    };
    let ser = |e: serde_json::Error| BulkError::Serialize {
        path: path.to_owned(),
        reason: e.to_string(),
    };

    let file = tokio::fs::File::create(path).await.map_err(io)?;
    let mut out = BufWriter::new(file);
    match format {
        ExportFormat::JsonLines => {
            for entry in entries {
                let mut line = serde_json::to_vec(entry).map_err(ser)?;
                line.push(b'\n');
                out.write_all(&line).await.map_err(io)?;
            }
        }
        ExportFormat::JsonArray => {
            let body = serde_json::to_vec_pretty(entries).map_err(ser)?;
            out.write_all(&body).await.map_err(io)?;
            out.write_all(b"\n").await.map_err(io)?;
        }
    }
    out.flush().await.map_err(io)?;

    info!(path = %path.display(), entries = entries.len(), ?format, "export written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn entries() -> Vec<ExportEntry<Value>> {
        vec![
            ExportEntry {
                path: "residents/a".into(),
                data: json!({"resident_name": "A"}),
            },
            ExportEntry {
                path: "residents/b".into(),
                data: json!({"resident_name": "B"}),
            },
        ]
    }

    #[tokio::test]
    async fn json_lines_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        write_entries(&path, &entries(), ExportFormat::JsonLines)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let back: Vec<ExportEntry<Value>> = read_entries(&path).await.unwrap();
        assert_eq!(back, entries());
    }

    #[tokio::test]
    async fn json_array_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        write_entries(&path, &entries(), ExportFormat::JsonArray)
            .await
            .unwrap();

        let back: Vec<ExportEntry<Value>> = read_entries(&path).await.unwrap();
        assert_eq!(back, entries());
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.jsonl");
        std::fs::write(
            &path,
            "\n{\"path\":\"residents/a\",\"data\":{\"resident_name\":\"A\"}}\n\n",
        )
        .unwrap();
        let back: Vec<ExportEntry<Value>> = read_entries(&path).await.unwrap();
        assert_eq!(back.len(), 1);
    }

    #[tokio::test]
    async fn parse_error_reports_line_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.jsonl");
        std::fs::write(
            &path,
            "{\"path\":\"residents/a\",\"data\":{}}\n{\"path\":\"residents/b\",\"data\":\"1950-01-01\"}\n",
        )
        .unwrap();

        let err = read_entries::<serde_json::Map<String, Value>>(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Parse { line: 2, category: "data", .. }));
        assert!(!err.to_string().contains("1950-01-01"));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_entries::<Value>(&dir.path().join("absent.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Io { .. }));
    }
}
