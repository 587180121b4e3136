//! HTTP surface.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::archive::{ArchiveIndex, ARCHIVE_MOUNT};
use crate::error::MirrorError;
use crate::library::{GeneratedLibrary, AUDIO_MOUNT};
use crate::mirror::RemoteMirror;
use crate::scheduler::{Scheduler, Snapshot};
use crate::sources::CompositePicker;

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub scheduler: Arc<Scheduler>,
    pub picker: Arc<CompositePicker>,
    pub library: Arc<GeneratedLibrary>,
    pub archive: Arc<ArchiveIndex>,
    pub mirror: Option<Arc<RemoteMirror>>,
}

pub fn build_router(state: AppState) -> Router {
    let audio = ServeDir::new(state.library.dir());
    let archive = ServeDir::new(state.archive.root());

    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "OK" }))
        .route("/aiRadio", get(ai_radio))
        .route("/api/v1/radio/queue", get(radio_queue))
        .route("/api/v1/status", get(status))
        .route("/songs", get(songs))
        .route("/archive/remote", get(archive_remote))
        .nest_service(AUDIO_MOUNT, audio)
        .nest_service(ARCHIVE_MOUNT, archive)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "AI radio engine is running. Try /aiRadio"
}

/// Body of `/aiRadio` for a snapshot (or the lack of one).
pub fn radio_response(snapshot: Option<Snapshot>) -> Value {
    match snapshot {
        Some(s) => json!({ "now_playing": s.now_playing, "queue_len": s.queue_len }),
        None => json!({ "ok": false, "detail": "No songs available for aiRadio" }),
    }
}

async fn ai_radio(State(state): State<AppState>) -> Json<Value> {
    Json(radio_response(state.scheduler.snapshot().await))
}

async fn radio_queue(State(state): State<AppState>) -> Json<Value> {
    let view = state.scheduler.queue_view().await;
    Json(json!({ "ok": true, "target_len": state.scheduler.target_len(), "queue": view }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let mirror_listings = match &state.mirror {
        Some(m) => Some(m.cached_listing_count().await),
        None => None,
    };
    Json(json!({
        "version": state.version,
        "queue_len": state.scheduler.state().await.len(),
        "sources": state.picker.kinds(),
        "library_songs": state.library.songs().await.len(),
        "archive_files": state.archive.len().await,
        "mirror_base": state.mirror.as_ref().map(|m| m.base().to_string()),
        "mirror_cached_listings": mirror_listings,
    }))
}

async fn songs(State(state): State<AppState>) -> Json<Value> {
    let songs = state.library.songs().await;
    Json(json!({
        "songs": songs.as_slice(),
        "dir": state.library.dir().display().to_string(),
        "refreshed_at": state.library.refreshed_at(),
    }))
}

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    #[serde(default)]
    path: String,
}

fn mirror_error_status(e: &MirrorError) -> StatusCode {
    match e {
        MirrorError::Disabled => StatusCode::NOT_FOUND,
        MirrorError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn archive_remote(
    State(state): State<AppState>,
    Query(q): Query<BrowseQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let res = match &state.mirror {
        Some(m) => m.browse(&q.path).await,
        None => Err(MirrorError::Disabled),
    };
    match res {
        Ok(listing) => Ok(Json(json!(listing.as_ref()))),
        Err(e) => {
            tracing::warn!("mirror browse {:?} failed: {e}", q.path);
            Err((mirror_error_status(&e), Json(json!({ "ok": false, "detail": e.to_string() }))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::sources::TrackPicker;
    use crate::track::{Locator, TrackCandidate, TrackSource};

    struct One;

    #[async_trait]
    impl TrackPicker for One {
        async fn pick(&self) -> Option<TrackCandidate> {
            let mut c = TrackCandidate::new(TrackSource::Archive, Locator::Path("/a/b.mp3".into()), 200.0);
            c.display_name = "b.mp3".into();
            c.href = "/archive/api_audio/a/b.mp3".into();
            Some(c)
        }
    }

    struct Never;

    #[async_trait]
    impl TrackPicker for Never {
        async fn pick(&self) -> Option<TrackCandidate> {
            None
        }
    }

    fn app(picker: Arc<dyn TrackPicker>, dir: &std::path::Path) -> Router {
        build_router(AppState {
            version: "test".into(),
            scheduler: Arc::new(Scheduler::new(picker, 3)),
            picker: Arc::new(CompositePicker::new(Vec::new())),
            library: Arc::new(GeneratedLibrary::new(dir)),
            archive: Arc::new(ArchiveIndex::new(dir)),
            mirror: None,
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app.oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn ai_radio_reports_now_playing() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(Arc::new(One), tmp.path()), "/aiRadio").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue_len"], 1);
        let np = &body["now_playing"];
        assert_eq!(np["display_name"], "b.mp3");
        assert_eq!(np["source"], "archive");
        assert_eq!(np["file"], "/archive/api_audio/a/b.mp3");
        assert_eq!(np["duration"], 200.0);
        assert!(np.get("href").is_none() && np.get("duration_seconds").is_none());
        assert!(np["remaining"].as_f64().unwrap() <= 200.0);
        assert!(np["started_at"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn ai_radio_without_songs() {
        let tmp = tempfile::tempdir().unwrap();
        let (_, body) = get_json(app(Arc::new(Never), tmp.path()), "/aiRadio").await;
        assert_eq!(body, json!({ "ok": false, "detail": "No songs available for aiRadio" }));
    }

    #[tokio::test]
    async fn remote_browse_without_mirror_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(Arc::new(Never), tmp.path()), "/archive/remote?path=x").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn serves_library_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x.mp3"), b"ID3").unwrap();
        let resp = app(Arc::new(Never), tmp.path())
            .oneshot(Request::get("/api_audio/x.mp3").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn mirror_errors_map_to_statuses() {
        assert_eq!(mirror_error_status(&MirrorError::InvalidPath("..".into())), StatusCode::BAD_REQUEST);
        assert_eq!(mirror_error_status(&MirrorError::Status(500)), StatusCode::BAD_GATEWAY);
    }
}
