use std::sync::Arc;

use async_trait::async_trait;

use super::{GeneratedLibraryCache, SongSource};
use crate::mpeg::resolve_duration;
use crate::probe::local_duration;
use crate::track::{first_non_empty, Locator, TrackCandidate, TrackSource};

/// Songs produced by the local generation service.
pub struct GeneratedSource {
    library: Arc<dyn GeneratedLibraryCache>,
}

impl GeneratedSource {
    pub fn new(library: Arc<dyn GeneratedLibraryCache>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl SongSource for GeneratedSource {
    fn kind(&self) -> TrackSource {
        TrackSource::Generated
    }

    async fn pick_one(&self) -> Option<TrackCandidate> {
        let song = self.library.random_entry().await?;
        if !song.filename.to_ascii_lowercase().ends_with(".mp3") {
            return None;
        }
        let path = self.library.resolve(&song)?;

        let raw = local_duration(path.clone()).await.unwrap_or_else(|e| {
            tracing::debug!("duration probe failed for {}: {e}", path.display());
            0.0
        });

        let mut c = TrackCandidate::new(TrackSource::Generated, Locator::Path(path), resolve_duration(raw));
        c.display_name = match first_non_empty([song.title.as_str(), song.filename.as_str(), song.task_id.as_str()]) {
            s if s.is_empty() => "song".into(),
            s => s,
        };
        c.href = song.file;
        c.author = song.author;
        c.title = song.title;
        c.caption = song.caption;
        c.created_at = song.created_at;
        c.task_id = song.task_id;
        Some(c)
    }
}
