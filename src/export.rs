//! Tabular export: merged rows → CSV artifact addressable by filename.
//!
//! The header is `document_name,page_number` followed by the union of every
//! field key in first-seen order, so documents with different schemas share
//! one table and a row simply leaves foreign columns empty.

use crate::error::ExtractError;
use crate::history::unix_now;
use crate::output::ExtractedRow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, info};

const STAMP_COLUMNS: [&str; 2] = ["document_name", "page_number"];

static RE_ARTIFACT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^output_data_[0-9]+(_[0-9]+)?\.csv$").unwrap());

/// Writes and serves CSV artifacts from one directory.
#[derive(Debug)]
pub struct TabularExporter {
    dir: PathBuf,
    /// Names handed out but possibly not written yet.
    reserved: Mutex<HashSet<String>>,
    /// Keeps a temporary artifact directory alive for the exporter's lifetime.
    _temp: Option<TempDir>,
}

impl TabularExporter {
    /// Export into `dir`, creating it on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            reserved: Mutex::new(HashSet::new()),
            _temp: None,
        }
    }

    /// Export into a fresh temporary directory, removed on drop.
    pub fn temporary() -> Result<Self, ExtractError> {
        let temp = TempDir::new()
            .map_err(|e| ExtractError::Internal(format!("Failed to create export dir: {}", e)))?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            reserved: Mutex::new(HashSet::new()),
            _temp: Some(temp),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh `output_data_<unix_seconds>.csv` name, suffixed `_<n>` when
    /// the plain name is already taken.
    pub fn next_filename(&self) -> String {
        let stamp = unix_now();
        let mut reserved = match self.reserved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut name = format!("output_data_{}.csv", stamp);
        let mut n = 1;
        while reserved.contains(&name) || self.dir.join(&name).exists() {
            name = format!("output_data_{}_{}.csv", stamp, n);
            n += 1;
        }
        reserved.insert(name.clone());
        name
    }

    /// Write `rows` as CSV under `filename`, replacing any previous file.
    pub async fn export(
        &self,
        rows: &[ExtractedRow],
        filename: &str,
    ) -> Result<PathBuf, ExtractError> {
        let path = self.artifact_path(filename)?;
        let csv = render_csv(rows);

        let result = self.write_atomic(&path, csv.as_bytes()).await;
        // Once the file exists (or the write failed) the name needs no reservation.
        self.release(filename);
        result?;

        info!("Exported {} rows → {}", rows.len(), path.display());
        Ok(path)
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ExtractError> {
        let write_err = |e| ExtractError::ExportFailed {
            path: path.to_path_buf(),
            source: e,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;

        // Atomic write: temp file, then rename
        let tmp_path = path.with_extension("csv.tmp");
        tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
    }

    fn release(&self, filename: &str) {
        let mut reserved = match self.reserved.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        reserved.remove(filename);
    }

    /// Bytes of a previously exported artifact.
    pub async fn fetch(&self, filename: &str) -> Result<Vec<u8>, ExtractError> {
        let path = self.artifact_path(filename)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                debug!("Artifact {} unavailable: {}", path.display(), e);
                Err(ExtractError::ArtifactNotFound {
                    filename: filename.to_string(),
                })
            }
        }
    }

    /// Resolve a filename token; anything but a plain artifact name is
    /// rejected, so a token can never leave the artifact directory.
    fn artifact_path(&self, filename: &str) -> Result<PathBuf, ExtractError> {
        if !RE_ARTIFACT_NAME.is_match(filename) {
            return Err(ExtractError::ArtifactNotFound {
                filename: filename.to_string(),
            });
        }
        Ok(self.dir.join(filename))
    }
}

/// Render rows as RFC 4180 CSV with a union-of-keys header.
pub fn render_csv(rows: &[ExtractedRow]) -> String {
    let columns = column_union(rows);

    let mut out = String::new();
    let header: Vec<String> = STAMP_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(columns.iter().cloned())
        .map(|c| escape_csv(&c))
        .collect();
    out.push_str(&header.join(","));
    out.push_str("\r\n");

    for row in rows {
        let mut cells = Vec::with_capacity(columns.len() + 2);
        cells.push(escape_csv(&row.document_name));
        cells.push(row.page_number.to_string());
        for column in &columns {
            let cell = row.fields.get(column).map(cell_text).unwrap_or_default();
            cells.push(escape_csv(&cell));
        }
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Field keys in first-seen order, minus the stamp columns.
fn column_union(rows: &[ExtractedRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for row in rows {
        for key in row.fields.keys() {
            if STAMP_COLUMNS.contains(&key.as_str()) {
                continue;
            }
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn row(doc: &str, page: usize, fields: Value) -> ExtractedRow {
        let fields: Map<String, Value> = fields.as_object().cloned().unwrap();
        ExtractedRow::new(doc, page, fields)
    }

    #[test]
    fn header_is_union_of_keys() {
        let rows = vec![
            row("a.pdf", 1, json!({"sku": "A1", "qty": 2})),
            row("b.pdf", 1, json!({"vendor": "ACME", "sku": "B7"})),
        ];
        let csv = render_csv(&rows);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], "document_name,page_number,sku,qty,vendor");
        assert_eq!(lines[1], "a.pdf,1,A1,2,");
        assert_eq!(lines[2], "b.pdf,1,B7,,ACME");
    }

    #[test]
    fn cells_are_quoted_and_typed() {
        let rows = vec![row(
            "x.pdf",
            3,
            json!({"note": "say \"hi\", bye", "ok": true, "none": null, "tags": ["a", "b"]}),
        )];
        let csv = render_csv(&rows);
        let line = csv.split("\r\n").nth(1).unwrap();
        assert_eq!(line, r#"x.pdf,3,"say ""hi"", bye",true,,"[""a"",""b""]""#);
    }

    #[test]
    fn stamp_keys_from_model_are_not_duplicated() {
        let rows = vec![row("x.pdf", 1, json!({"page_number": 99, "total": 5}))];
        let csv = render_csv(&rows);
        assert!(csv.starts_with("document_name,page_number,total\r\n"));
        assert!(csv.contains("x.pdf,1,5"));
    }

    #[tokio::test]
    async fn export_is_idempotent_and_fetchable() {
        let exporter = TabularExporter::temporary().unwrap();
        let rows = vec![row("a.pdf", 1, json!({"k": "v"}))];
        let name = exporter.next_filename();

        let path = exporter.export(&rows, &name).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        exporter.export(&rows, &name).await.unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);

        assert_eq!(exporter.fetch(&name).await.unwrap(), first);
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[tokio::test]
    async fn fetch_rejects_unknown_and_traversal() {
        let exporter = TabularExporter::temporary().unwrap();
        for bad in [
            "output_data_1.csv",
            "../output_data_1.csv",
            "/etc/passwd",
            "output_data_abc.csv",
            "",
        ] {
            let err = exporter.fetch(bad).await.unwrap_err();
            assert!(matches!(err, ExtractError::ArtifactNotFound { .. }), "{bad}");
        }
    }

    #[test]
    fn filenames_are_unique() {
        let exporter = TabularExporter::temporary().unwrap();
        let a = exporter.next_filename();
        let b = exporter.next_filename();
        assert_ne!(a, b);
        assert!(RE_ARTIFACT_NAME.is_match(&a));
        assert!(RE_ARTIFACT_NAME.is_match(&b));
    }

    #[tokio::test]
    async fn reservation_is_released_after_export() {
        let exporter = TabularExporter::temporary().unwrap();
        let rows = vec![row("a.pdf", 1, json!({"k": "v"}))];
        for _ in 0..3 {
            let name = exporter.next_filename();
            exporter.export(&rows, &name).await.unwrap();
        }
        assert!(exporter.reserved.lock().unwrap().is_empty());

        // The written file alone keeps its name from being handed out again.
        let next = exporter.next_filename();
        assert_eq!(std::fs::read_dir(exporter.dir()).unwrap().count(), 3);
        assert!(!exporter.dir().join(&next).exists());
    }

    #[tokio::test]
    async fn reservation_is_released_when_the_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let exporter = TabularExporter::new(&blocker);
        let rows = vec![row("a.pdf", 1, json!({"k": "v"}))];

        let name = exporter.next_filename();
        let err = exporter.export(&rows, &name).await.unwrap_err();
        assert!(matches!(err, ExtractError::ExportFailed { .. }));
        assert!(exporter.reserved.lock().unwrap().is_empty());
    }
}
