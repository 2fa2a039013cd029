//! Input resolution: turn a local path, URL or upload into a named PDF held
//! in memory.
//!
//! Documents are loaded by pdfium straight from a byte slice, so no temp
//! file is needed even for downloads. The PDF magic bytes (`%PDF`) are
//! checked here so callers get a meaningful error before any worker starts.

use crate::error::ExtractError;
use crate::job::DocumentSource;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Name used when a filename sanitises to nothing.
const FALLBACK_NAME: &str = "document.pdf";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a CLI argument (path or URL) to an in-memory document.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<DocumentSource, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

/// Build a document from an uploaded file part.
pub fn document_from_upload(
    filename: Option<&str>,
    bytes: impl Into<Vec<u8>>,
) -> Result<DocumentSource, ExtractError> {
    let name = sanitize_filename(filename.unwrap_or(FALLBACK_NAME));
    let bytes = bytes.into();
    check_magic(&name, &bytes)?;
    Ok(DocumentSource::new(name, bytes))
}

/// Keep only alphanumerics, spaces, `.` and `_`; trailing spaces are
/// dropped. Directory separators disappear with everything else, so the
/// result never escapes a directory.
pub fn sanitize_filename(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_'))
        .collect();
    let cleaned = cleaned.trim_end();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Make document names unique within a job: the second `a.pdf` becomes
/// `a (2).pdf`, the third `a (3).pdf`, and so on.
pub fn dedupe_names(documents: &mut [DocumentSource]) {
    let mut seen: HashSet<String> = documents.iter().map(|d| d.name.clone()).collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for doc in documents.iter_mut() {
        let n = counts.entry(doc.name.clone()).or_insert(0);
        *n += 1;
        if *n == 1 {
            continue;
        }
        let mut k = *n;
        let mut candidate = numbered_name(&doc.name, k);
        while seen.contains(&candidate) {
            k += 1;
            candidate = numbered_name(&doc.name, k);
        }
        debug!("Renamed duplicate '{}' → '{}'", doc.name, candidate);
        seen.insert(candidate.clone());
        doc.name = candidate;
    }
}

fn numbered_name(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), ExtractError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(ExtractError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

/// Read a local file, validating existence, permissions and magic bytes.
async fn resolve_local(path: &Path) -> Result<DocumentSource, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| sanitize_filename(&n.to_string_lossy()))
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    check_magic(&name, &bytes)?;

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(DocumentSource::new(name, bytes))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<DocumentSource, ExtractError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_error)?;
    let name = sanitize_filename(&filename_from_url(url));
    check_magic(&name, &bytes)?;

    info!("Downloaded '{}' ({} bytes)", name, bytes.len());
    Ok(DocumentSource::new(name, bytes.to_vec()))
}

/// Last path segment of the URL when it looks like a filename.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Expand CLI inputs: directories contribute their `*.pdf` files, sorted.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut out = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if is_url(input) || !path.is_dir() {
            out.push(input.clone());
            continue;
        }
        let entries = std::fs::read_dir(&path).map_err(|_| ExtractError::FileNotFound {
            path: path.clone(),
        })?;
        let mut pdfs: Vec<String> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
            })
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        pdfs.sort();
        out.extend(pdfs);
    }
    Ok(out)
}
