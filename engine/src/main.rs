use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use airadio_engine::api::{build_router, AppState};
use airadio_engine::archive::ArchiveIndex;
use airadio_engine::config::EngineConfig;
use airadio_engine::library::GeneratedLibrary;
use airadio_engine::mirror::RemoteMirror;
use airadio_engine::persist::QueueStore;
use airadio_engine::probe::RemoteProber;
use airadio_engine::scheduler::Scheduler;
use airadio_engine::sources::{ArchiveSource, CompositePicker, GeneratedSource, RemoteMirrorSource, SongSource};
use airadio_engine::ticker::{spawn_radio_ticker, spawn_refresher};
use airadio_engine::track::now_epoch_secs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let cfg = EngineConfig::from_env()?;

    // --- Caches ---
    let library = Arc::new(GeneratedLibrary::new(cfg.audio_dir.clone()));
    let archive = Arc::new(ArchiveIndex::new(cfg.archive_dir.clone()));
    let mirror = match &cfg.mirror_base_url {
        Some(url) => Some(Arc::new(RemoteMirror::new(url, cfg.mirror_cache_ttl, cfg.remote_timeout)?)),
        None => None,
    };

    // Warm the local caches before the first tick so it has something to pick.
    match library.refresh().await {
        Ok(n) => info!("generated library: {n} song(s) in {}", library.dir().display()),
        Err(e) => warn!("generated library scan failed: {e}"),
    }
    match archive.refresh().await {
        Ok(n) => info!("archive: {n} file(s) in {}", archive.root().display()),
        Err(e) => warn!("archive scan failed: {e}"),
    }

    // --- Sources ---
    let mut sources: Vec<Arc<dyn SongSource>> = vec![
        Arc::new(GeneratedSource::new(library.clone())),
        Arc::new(ArchiveSource::new(archive.clone())),
    ];
    if let Some(m) = &mirror {
        let prober = RemoteProber::new(cfg.remote_timeout, cfg.remote_probe_bytes)?;
        info!("remote mirror at {} (probe {} bytes)", m.base(), prober.probe_bytes());
        sources.push(Arc::new(RemoteMirrorSource::new(m.clone(), prober)));
    }
    let picker = Arc::new(CompositePicker::new(sources));
    info!("radio sources: {:?}", picker.kinds());

    // --- Scheduler ---
    let scheduler = Arc::new(Scheduler::new(picker.clone(), cfg.queue_len));
    let store = cfg.db_path.clone().map(QueueStore::new);
    if let Some(store) = &store {
        let restored = store.load_or_empty(now_epoch_secs()).await;
        if !restored.is_empty() {
            let popped = scheduler.restore(restored).await;
            info!("resumed radio queue from {} ({popped} finished while offline)", store.path().display());
        }
    }

    // --- Background loops ---
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    {
        let lib = library.clone();
        tasks.push(spawn_refresher("library", cfg.song_refresh_every, cancel.clone(), move || {
            let lib = lib.clone();
            async move { lib.refresh().await }
        }));
    }
    {
        let arc = archive.clone();
        tasks.push(spawn_refresher("archive", cfg.archive_refresh_every, cancel.clone(), move || {
            let arc = arc.clone();
            async move { arc.refresh().await }
        }));
    }
    tasks.push(spawn_radio_ticker(scheduler.clone(), cfg.tick_every, store.clone(), cancel.clone()));

    let state = AppState {
        version: version.clone(),
        scheduler: scheduler.clone(),
        picker,
        library,
        archive,
        mirror,
    };
    let app = build_router(state);

    info!("AI radio engine {version} starting on http://{}", cfg.bind);

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    for t in tasks {
        let _ = t.await;
    }
    if let Some(store) = &store {
        if let Err(e) = store.save(scheduler.state().await).await {
            warn!("failed to persist radio queue on shutdown: {e}");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
