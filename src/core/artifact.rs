//! Artifact presence checks and content fingerprints.
//!
//! Artifact paths are relative to the working directory and may be glob
//! patterns (`dist/*.zip`). A directory artifact is fingerprinted over its
//! file names and contents, so re-running a stage that rewrites identical
//! output reports no change.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactState {
    pub path: String,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactChange {
    pub path: String,
    pub present: bool,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

fn is_pattern(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

/// Files and directories matching an artifact path.
pub fn resolve(work_dir: &Path, artifact: &str) -> Result<Vec<PathBuf>> {
    if !is_pattern(artifact) {
        let full = work_dir.join(artifact);
        return Ok(if full.exists() { vec![full] } else { Vec::new() });
    }

    let base = glob::Pattern::escape(&work_dir.to_string_lossy());
    let pattern = Path::new(&base).join(artifact).to_string_lossy().to_string();
    let entries = glob::glob(&pattern).map_err(|e| {
        Error::config_invalid_value("artifact", Some(artifact.to_string()), e.to_string())
    })?;

    // Dangling symlinks match the pattern but are not artifacts.
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.exists())
        .collect();
    matches.sort();
    Ok(matches)
}

pub fn is_present(work_dir: &Path, artifact: &str) -> Result<bool> {
    Ok(!resolve(work_dir, artifact)?.is_empty())
}

/// SHA-256 over every file the artifact resolves to, or `None` when absent.
pub fn fingerprint(work_dir: &Path, artifact: &str) -> Result<Option<String>> {
    let roots = resolve(work_dir, artifact)?;
    if roots.is_empty() {
        return Ok(None);
    }

    let mut files = Vec::new();
    for root in &roots {
        collect_files(root, &mut files)?;
    }
    files.sort();
    files.dedup();

    let mut hasher = Sha256::new();
    for file in &files {
        let relative = file.strip_prefix(work_dir).unwrap_or(file);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        let content = fs::read(file).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", file.display())))
        })?;
        hasher.update(&content);
        hasher.update([0u8]);
    }

    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// Regular files under `path`. Symlinks are followed only to files, and
/// sockets, FIFOs and dangling links are skipped.
fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("stat {}", path.display())))
    })?;

    if meta.file_type().is_symlink() {
        if fs::metadata(path).map(|target| target.is_file()).unwrap_or(false) {
            files.push(path.to_path_buf());
        }
        return Ok(());
    }
    if meta.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    if !meta.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("list {}", path.display())))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::internal_io(e.to_string(), None))?;
        collect_files(&entry.path(), files)?;
    }
    Ok(())
}

pub fn snapshot(work_dir: &Path, artifacts: &[String]) -> Result<Vec<ArtifactState>> {
    artifacts
        .iter()
        .map(|path| {
            let fingerprint = fingerprint(work_dir, path)?;
            Ok(ArtifactState {
                path: path.clone(),
                present: fingerprint.is_some(),
                fingerprint,
            })
        })
        .collect()
}

/// Compare artifact states captured before and after a stage ran.
pub fn diff(before: &[ArtifactState], after: &[ArtifactState]) -> Vec<ArtifactChange> {
    after
        .iter()
        .map(|state| {
            let previous = before.iter().find(|b| b.path == state.path);
            let changed = previous.map(|b| b.fingerprint != state.fingerprint).unwrap_or(true);
            ArtifactChange {
                path: state.path.clone(),
                present: state.present,
                changed,
                fingerprint: state.fingerprint.clone(),
            }
        })
        .collect()
}
