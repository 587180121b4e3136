//! Generated-song library.
//!
//! The generation service writes `<audio_id>.mp3` files (plus JSON sidecars)
//! into one flat directory. We rescan it on a timer and keep the result as an
//! immutable snapshot, newest first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::sidecar::SidecarMeta;
use crate::track::{local_href, now_epoch_secs};

/// URL prefix the library is served under.
pub const AUDIO_MOUNT: &str = "/api_audio";

/// One playable song, shaped the way the web UI lists it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibrarySong {
    pub task_id: String,
    pub output_index: i64,
    pub created_at: String,
    pub label: String,
    pub prompt: String,
    pub filename: String,
    pub file: String,
    pub mtime: i64,
    pub author: String,
    pub title: String,
    pub metas: Map<String, Value>,
    pub job_id: Option<String>,
    pub audio_id: String,
    pub caption: String,
}

/// Plain file name: no separators, no leading dot.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(|c| c == '/' || c == '\\' || c == '\0')
        && name != ".."
}

fn has_ext(name: &str, ext: &str) -> bool {
    name.len() > ext.len() && name.to_ascii_lowercase().ends_with(ext)
}

fn strip_ext(name: &str) -> &str {
    name.rsplit_once('.').map(|(base, _)| base).unwrap_or(name)
}

/// Sidecars keyed by the mp3 they describe. When two sidecars claim the same
/// mp3 the one with the newest `created_at` wins.
fn index_sidecars(dir: &Path, names: &[String]) -> HashMap<String, SidecarMeta> {
    let mut out: HashMap<String, SidecarMeta> = HashMap::new();
    for name in names.iter().filter(|n| has_ext(n, ".json")) {
        let Some(meta) = SidecarMeta::load(&dir.join(name)) else {
            continue;
        };

        let mp3 = match meta.audio_file.as_deref() {
            Some(bn) if is_safe_filename(bn) => bn.to_string(),
            _ => format!("{}.mp3", strip_ext(name)),
        };
        if !is_safe_filename(&mp3) {
            continue;
        }

        let newer = out
            .get(&mp3)
            .map(|cur| meta.created_at_epoch.unwrap_or(0.0) > cur.created_at_epoch.unwrap_or(0.0))
            .unwrap_or(true);
        if newer {
            out.insert(mp3, meta);
        }
    }
    out
}

fn mtime_secs(md: &std::fs::Metadata) -> f64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Scan `dir` for mp3 files. A missing directory is an empty library.
pub fn scan_library(dir: &Path) -> anyhow::Result<Vec<LibrarySong>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    let rd = std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("failed to read_dir({}): {e}", dir.display()))?;
    for ent in rd {
        let ent = ent.map_err(|e| anyhow::anyhow!("failed to read_dir entry: {e}"))?;
        if let Some(name) = ent.file_name().to_str() {
            if is_safe_filename(name) {
                names.push(name.to_string());
            }
        }
    }

    let sidecars = index_sidecars(dir, &names);

    let mut songs: Vec<(f64, LibrarySong)> = Vec::new();
    for name in names.iter().filter(|n| has_ext(n, ".mp3")) {
        let full = dir.join(name);
        let Ok(md) = std::fs::metadata(&full) else {
            continue;
        };
        if !md.is_file() {
            continue;
        }

        let audio_id = strip_ext(name).to_string();
        let meta = sidecars
            .get(name)
            .cloned()
            .or_else(|| SidecarMeta::load(&dir.join(format!("{audio_id}.json"))))
            .unwrap_or_default();

        let sort_epoch = meta.created_at_epoch.unwrap_or_else(|| mtime_secs(&md));
        songs.push((
            sort_epoch,
            LibrarySong {
                task_id: meta.job_id.clone().unwrap_or_else(|| audio_id.clone()),
                output_index: meta.audio_index,
                created_at: meta.created_at_display(),
                label: meta.caption.clone(),
                prompt: meta.caption.clone(),
                filename: name.clone(),
                file: local_href(AUDIO_MOUNT, name),
                mtime: sort_epoch as i64,
                author: meta.author,
                title: meta.title,
                metas: meta.metas,
                job_id: meta.job_id,
                audio_id,
                caption: meta.caption,
            },
        ));
    }

    songs.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(songs.into_iter().map(|(_, s)| s).collect())
}

/// Periodically rescanned view of the generated-song directory.
pub struct GeneratedLibrary {
    dir: PathBuf,
    songs: RwLock<Arc<Vec<LibrarySong>>>,
    refreshed_at: AtomicI64,
}

impl GeneratedLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            songs: RwLock::new(Arc::new(Vec::new())),
            refreshed_at: AtomicI64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory and swap in the new snapshot.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let dir = self.dir.clone();
        let songs = tokio::task::spawn_blocking(move || scan_library(&dir)).await??;
        let n = songs.len();
        *self.songs.write().await = Arc::new(songs);
        self.refreshed_at.store(now_epoch_secs() as i64, Ordering::Relaxed);
        Ok(n)
    }

    /// Epoch seconds of the last successful scan; 0 before the first.
    pub fn refreshed_at(&self) -> i64 {
        self.refreshed_at.load(Ordering::Relaxed)
    }

    pub async fn songs(&self) -> Arc<Vec<LibrarySong>> {
        self.songs.read().await.clone()
    }

    pub async fn random_song(&self) -> Option<LibrarySong> {
        let songs = self.songs().await;
        if songs.is_empty() {
            return None;
        }
        songs.get(fastrand::usize(..songs.len())).cloned()
    }

    /// Absolute path of a library song, if it still exists on disk.
    pub fn resolve_path(&self, filename: &str) -> Option<PathBuf> {
        if !is_safe_filename(filename) {
            return None;
        }
        let full = self.dir.join(filename);
        full.is_file().then_some(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, body: &[u8]) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn sidecars_match_by_audio_path_then_basename() {
        let tmp = tempfile::tempdir().unwrap();
        let d = tmp.path();
        write(d, "aaa.mp3", b"x");
        write(d, "bbb.mp3", b"x");
        write(d, "ccc.mp3", b"x");
        write(d, "notes.txt", b"ignored");

        // Names aaa.mp3 through audio_path even though its own name differs.
        let j1 = json!({ "audio_path": "/x/y/aaa.mp3", "created_at": 200, "metas": { "title": "First" } });
        write(d, "job1.json", j1.to_string().as_bytes());
        // Falls back to its own base name.
        let j2 = json!({ "created_at": 300, "artist": "Bee", "metas": { "caption": "synthwave" } });
        write(d, "bbb.json", j2.to_string().as_bytes());

        let songs = scan_library(d).unwrap();
        assert_eq!(songs.len(), 3);

        // created_at 300 sorts before 200; ccc has only its mtime (now), which is newest.
        assert_eq!(songs[0].filename, "ccc.mp3");
        assert_eq!(songs[1].filename, "bbb.mp3");
        assert_eq!(songs[2].filename, "aaa.mp3");

        assert_eq!(songs[1].author, "Bee");
        assert_eq!(songs[1].label, "synthwave");
        assert_eq!(songs[2].title, "First");
        assert_eq!(songs[2].file, "/api_audio/aaa.mp3");
        assert_eq!(songs[0].task_id, "ccc");
    }

    #[test]
    fn newest_sidecar_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let d = tmp.path();
        write(d, "song.mp3", b"x");
        let old = json!({ "audio_path": "song.mp3", "created_at": 10, "title": "old" });
        let new = json!({ "audio_path": "song.mp3", "created_at": 20, "title": "new" });
        write(d, "a.json", old.to_string().as_bytes());
        write(d, "b.json", new.to_string().as_bytes());

        let songs = scan_library(d).unwrap();
        assert_eq!(songs[0].title, "new");
    }

    #[test]
    fn missing_dir_is_empty() {
        assert!(scan_library(Path::new("/no/such/dir")).unwrap().is_empty());
    }

    #[test]
    fn unsafe_names_rejected() {
        assert!(is_safe_filename("abc.mp3"));
        assert!(!is_safe_filename("../abc.mp3"));
        assert!(!is_safe_filename(".hidden.mp3"));
        assert!(!is_safe_filename("a/b.mp3"));
        assert!(!is_safe_filename(""));
    }

    #[tokio::test]
    async fn refresh_and_pick() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = GeneratedLibrary::new(tmp.path());
        assert!(lib.random_song().await.is_none());
        assert_eq!(lib.refreshed_at(), 0);

        write(tmp.path(), "only.mp3", b"x");
        assert_eq!(lib.refresh().await.unwrap(), 1);
        assert!(lib.refreshed_at() > 0);
        let song = lib.random_song().await.unwrap();
        assert_eq!(song.filename, "only.mp3");
        assert_eq!(lib.resolve_path(&song.filename), Some(tmp.path().join("only.mp3")));
        assert_eq!(lib.resolve_path("gone.mp3"), None);
    }
}
