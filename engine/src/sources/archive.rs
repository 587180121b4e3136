use std::sync::Arc;

use async_trait::async_trait;

use super::{ArchiveCache, SongSource};
use crate::archive::ARCHIVE_MOUNT;
use crate::mpeg::resolve_duration;
use crate::probe::local_duration;
use crate::track::{local_href, Locator, TrackCandidate, TrackSource};

/// Older songs kept in the local archive tree.
pub struct ArchiveSource {
    archive: Arc<dyn ArchiveCache>,
}

impl ArchiveSource {
    pub fn new(archive: Arc<dyn ArchiveCache>) -> Self {
        Self { archive }
    }
}

#[async_trait]
impl SongSource for ArchiveSource {
    fn kind(&self) -> TrackSource {
        TrackSource::Archive
    }

    async fn pick_one(&self) -> Option<TrackCandidate> {
        let entry = self.archive.random_entry().await?;

        let raw = local_duration(entry.full_path.clone()).await.unwrap_or_else(|e| {
            tracing::debug!("duration probe failed for {}: {e}", entry.full_path.display());
            0.0
        });

        let name = entry.rel_path.rsplit('/').next().unwrap_or(&entry.rel_path).to_string();
        let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&name).to_string();

        let mut c = TrackCandidate::new(TrackSource::Archive, Locator::Path(entry.full_path), resolve_duration(raw));
        c.href = local_href(ARCHIVE_MOUNT, &entry.rel_path);
        c.display_name = name;
        c.task_id = stem;
        if let Some(meta) = entry.meta {
            c.created_at = meta.created_at_display();
            if let Some(job) = meta.job_id {
                c.task_id = job;
            }
            c.author = meta.author;
            c.title = meta.title;
            c.caption = meta.caption;
        }
        Some(c)
    }
}
