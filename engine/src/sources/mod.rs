//! Song sources for the radio.
//!
//! Each source draws one random track from a cache some other task keeps warm,
//! probes its duration and returns a [`TrackCandidate`]. Sources never
//! de-duplicate; the scheduler owns that.

mod archive;
mod generated;
mod remote;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

pub use archive::ArchiveSource;
pub use generated::GeneratedSource;
pub use remote::RemoteMirrorSource;

use crate::archive::{ArchiveEntry, ArchiveIndex};
use crate::library::{GeneratedLibrary, LibrarySong};
use crate::mirror::{RemoteMirror, RemoteTrack};
use crate::track::{TrackCandidate, TrackSource};

/// Random draws across sources before falling back to a fixed order.
pub const RANDOM_PICK_ATTEMPTS: usize = 12;

// --- Collaborator interfaces ------------------------------------------------

#[async_trait]
pub trait GeneratedLibraryCache: Send + Sync {
    async fn random_entry(&self) -> Option<LibrarySong>;
    fn resolve(&self, song: &LibrarySong) -> Option<PathBuf>;
}

#[async_trait]
pub trait ArchiveCache: Send + Sync {
    async fn random_entry(&self) -> Option<ArchiveEntry>;
}

/// Must only look at listings that were already fetched.
#[async_trait]
pub trait RemoteMirrorCache: Send + Sync {
    async fn any_cached_track(&self) -> Option<RemoteTrack>;
}

#[async_trait]
impl GeneratedLibraryCache for GeneratedLibrary {
    async fn random_entry(&self) -> Option<LibrarySong> {
        self.random_song().await
    }

    fn resolve(&self, song: &LibrarySong) -> Option<PathBuf> {
        self.resolve_path(&song.filename)
    }
}

#[async_trait]
impl ArchiveCache for ArchiveIndex {
    async fn random_entry(&self) -> Option<ArchiveEntry> {
        ArchiveIndex::random_entry(self).await
    }
}

#[async_trait]
impl RemoteMirrorCache for RemoteMirror {
    async fn any_cached_track(&self) -> Option<RemoteTrack> {
        RemoteMirror::any_cached_track(self).await
    }
}

// --- Sources ------------------------------------------------------------------

#[async_trait]
pub trait SongSource: Send + Sync {
    fn kind(&self) -> TrackSource;

    /// `None` when the backing cache is empty or the pick is unusable.
    async fn pick_one(&self) -> Option<TrackCandidate>;
}

/// What the scheduler draws from.
#[async_trait]
pub trait TrackPicker: Send + Sync {
    async fn pick(&self) -> Option<TrackCandidate>;
}

/// Uniform random choice among sources, retried up to
/// [`RANDOM_PICK_ATTEMPTS`] times, then every source once in order.
pub async fn pick_two_phase<F>(sources: &[Arc<dyn SongSource>], mut choose: F) -> Option<TrackCandidate>
where
    F: FnMut(usize) -> usize + Send,
{
    if sources.is_empty() {
        return None;
    }

    for _ in 0..RANDOM_PICK_ATTEMPTS {
        let i = choose(sources.len()) % sources.len();
        if let Some(c) = sources[i].pick_one().await {
            return Some(c);
        }
    }

    for s in sources {
        if let Some(c) = s.pick_one().await {
            return Some(c);
        }
    }
    None
}

/// The station's picker over generated, archive and remote-mirror sources.
pub struct CompositePicker {
    sources: Vec<Arc<dyn SongSource>>,
}

impl CompositePicker {
    /// `sources` order is the fallback order.
    pub fn new(sources: Vec<Arc<dyn SongSource>>) -> Self {
        Self { sources }
    }

    pub fn kinds(&self) -> Vec<TrackSource> {
        self.sources.iter().map(|s| s.kind()).collect()
    }
}

#[async_trait]
impl TrackPicker for CompositePicker {
    async fn pick(&self) -> Option<TrackCandidate> {
        pick_two_phase(&self.sources, |n| fastrand::usize(..n)).await
    }
}
