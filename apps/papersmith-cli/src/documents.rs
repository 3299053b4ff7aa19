//! Loading extracted paper text from a directory tree.
//!
//! Every `*.txt` file is one paper. An optional `<stem>.json` next to it
//! carries the metadata; without one the file stem is used as id and title.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use papersmith_core::types::{DocumentMetadata, SourceDocument};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    document_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    year: Option<i32>,
}

/// All `.txt` files under `root`, sorted.
pub fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("txt"))
        .collect();
    files.sort();
    files
}

fn read_sidecar(txt: &Path) -> anyhow::Result<Sidecar> {
    let path = txt.with_extension("json");
    if !path.exists() {
        return Ok(Sidecar::default());
    }
    let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_document(path: &Path) -> anyhow::Result<SourceDocument> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
    let sidecar = read_sidecar(path)?;
    let document_id = sidecar.document_id.filter(|id| !id.trim().is_empty()).unwrap_or_else(|| stem.clone());
    let mut metadata =
        DocumentMetadata::new(document_id, sidecar.title.unwrap_or(stem)).with_authors(sidecar.authors);
    if let Some(year) = sidecar.year {
        metadata = metadata.with_year(year);
    }
    debug!(path = %path.display(), document_id = %metadata.document_id, "loaded document");
    Ok(SourceDocument { text, metadata })
}

/// Load every paper under `root`. Unreadable files are skipped with a warning.
pub fn load_documents(root: &Path) -> Vec<SourceDocument> {
    list_txt_files(root)
        .iter()
        .filter_map(|path| match load_document(path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping document");
                None
            }
        })
        .collect()
}
