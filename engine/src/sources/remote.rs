use std::sync::Arc;

use async_trait::async_trait;

use super::{RemoteMirrorCache, SongSource};
use crate::mpeg::resolve_duration;
use crate::probe::RemoteProber;
use crate::track::{Locator, TrackCandidate, TrackSource};

/// Mp3s from remote listings that browsing has already cached.
pub struct RemoteMirrorSource {
    mirror: Arc<dyn RemoteMirrorCache>,
    prober: RemoteProber,
}

impl RemoteMirrorSource {
    pub fn new(mirror: Arc<dyn RemoteMirrorCache>, prober: RemoteProber) -> Self {
        Self { mirror, prober }
    }
}

#[async_trait]
impl SongSource for RemoteMirrorSource {
    fn kind(&self) -> TrackSource {
        TrackSource::RemoteMirror
    }

    async fn pick_one(&self) -> Option<TrackCandidate> {
        let track = self.mirror.any_cached_track().await?;
        let url = track.url.trim().to_string();
        if url.is_empty() {
            return None;
        }

        // Unreachable hosts only cost us the default duration.
        let raw = self.prober.duration(&url).await.unwrap_or_else(|e| {
            tracing::debug!("remote duration probe failed for {url}: {e}");
            0.0
        });

        let mut c = TrackCandidate::new(TrackSource::RemoteMirror, Locator::Url(url.clone()), resolve_duration(raw));
        c.href = url;
        c.display_name = if track.name.trim().is_empty() { "song".into() } else { track.name.clone() };
        c.task_id = track.name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&track.name).to_string();
        Some(c)
    }
}
