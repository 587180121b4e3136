//! Track candidates and queue entries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Generated,
    Archive,
    RemoteMirror,
}

impl TrackSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackSource::Generated => "generated",
            TrackSource::Archive => "archive",
            TrackSource::RemoteMirror => "remote_mirror",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generated" => Some(TrackSource::Generated),
            "archive" => Some(TrackSource::Archive),
            "remote_mirror" => Some(TrackSource::RemoteMirror),
            _ => None,
        }
    }
}

/// Where the audio bytes live: a local file or an absolute URL, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Path(PathBuf),
    Url(String),
}

impl Locator {
    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Path(_) => "path",
            Locator::Url(_) => "url",
        }
    }

    pub fn value(&self) -> String {
        match self {
            Locator::Path(p) => p.to_string_lossy().to_string(),
            Locator::Url(u) => u.clone(),
        }
    }
}

/// A pickable song with its duration already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub source: TrackSource,
    pub locator: Locator,
    /// Browser-facing URL for playback. Players read it as `file`.
    #[serde(rename = "file", alias = "href")]
    pub href: String,
    pub display_name: String,
    pub author: String,
    pub title: String,
    pub caption: String,
    pub created_at: String,
    pub task_id: String,
    /// Clamped to `[5, 21600]`; never zero.
    #[serde(rename = "duration", alias = "duration_seconds")]
    pub duration_seconds: f64,
}

/// Identity used to keep a track from appearing twice in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    source: TrackSource,
    locator: Locator,
    display_name: String,
}

impl TrackCandidate {
    pub fn new(source: TrackSource, locator: Locator, duration_seconds: f64) -> Self {
        Self {
            source,
            locator,
            href: String::new(),
            display_name: String::new(),
            author: String::new(),
            title: String::new(),
            caption: String::new(),
            created_at: String::new(),
            task_id: String::new(),
            duration_seconds,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            source: self.source,
            locator: self.locator.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub track: TrackCandidate,
    pub queued_at: f64,
}

impl QueueEntry {
    pub fn new(track: TrackCandidate, queued_at: f64) -> Self {
        Self { id: Uuid::new_v4(), track, queued_at }
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// First non-blank value, trimmed.
pub(crate) fn first_non_empty<'a>(vals: impl IntoIterator<Item = &'a str>) -> String {
    vals.into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// URL path for a file below a local mount, each segment percent-encoded.
pub(crate) fn local_href(mount: &str, rel: &str) -> String {
    let encoded: Vec<String> = rel
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!("{}/{}", mount.trim_end_matches('/'), encoded.join("/"))
}
