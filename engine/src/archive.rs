//! Local archive of older mp3s, walked recursively on a timer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::sidecar::SidecarMeta;

/// URL prefix the archive is served under.
pub const ARCHIVE_MOUNT: &str = "/archive/api_audio";

/// A picked archive file with whatever sidecar metadata sits next to it.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Posix-style path relative to the archive root.
    pub rel_path: String,
    pub full_path: PathBuf,
    pub meta: Option<SidecarMeta>,
}

/// Relative paths of every `.mp3` below `root`, skipping hidden directories.
pub fn walk_mp3s(root: &Path) -> anyhow::Result<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let rd = std::fs::read_dir(&dir)
            .map_err(|e| anyhow::anyhow!("failed to read_dir({}): {e}", dir.display()))?;
        for ent in rd {
            let ent = ent.map_err(|e| anyhow::anyhow!("failed to read_dir entry: {e}"))?;
            let p = ent.path();
            let name = ent.file_name();
            let name = name.to_string_lossy();
            if p.is_dir() {
                if !name.starts_with('.') {
                    stack.push(p);
                }
                continue;
            }
            if !p.is_file() || !name.to_ascii_lowercase().ends_with(".mp3") {
                continue;
            }
            let Ok(rel) = p.strip_prefix(root) else {
                continue;
            };
            let rel: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
            out.push(rel.join("/"));
        }
    }

    out.sort();
    Ok(out)
}

pub struct ArchiveIndex {
    root: PathBuf,
    paths: RwLock<Arc<Vec<String>>>,
}

impl ArchiveIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || walk_mp3s(&root)).await??;
        let n = paths.len();
        *self.paths.write().await = Arc::new(paths);
        Ok(n)
    }

    pub async fn len(&self) -> usize {
        self.paths.read().await.len()
    }

    /// Uniformly random archive file, with its sidecar loaded.
    pub async fn random_entry(&self) -> Option<ArchiveEntry> {
        let paths = self.paths.read().await.clone();
        if paths.is_empty() {
            return None;
        }
        let rel = paths[fastrand::usize(..paths.len())].clone();
        let full = self.root.join(&rel);

        tokio::task::spawn_blocking(move || {
            if !full.is_file() {
                return None;
            }
            let meta = SidecarMeta::load_beside(&full);
            Some(ArchiveEntry { rel_path: rel, full_path: full, meta })
        })
        .await
        .ok()
        .flatten()
    }
}
