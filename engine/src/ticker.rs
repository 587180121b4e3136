//! Background loops: the radio ticker and cache refreshers.
//!
//! Each iteration runs in its own task so a panic inside probing or scanning
//! is logged and the loop keeps going. Loops sleep a fixed interval between
//! iterations and stop when the token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::persist::QueueStore;
use crate::scheduler::Scheduler;

/// Advance and top up the station every `every`, saving the queue after
/// changes when a store is configured.
pub fn spawn_radio_ticker(
    scheduler: Arc<Scheduler>,
    every: Duration,
    store: Option<QueueStore>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut saved_rev = None;
        loop {
            let s = scheduler.clone();
            let mut tick = tokio::spawn(async move { s.tick().await });
            tokio::select! {
                _ = cancel.cancelled() => {
                    tick.abort();
                    break;
                }
                res = &mut tick => match res {
                    Ok(report) if report.changed() => {
                        debug!("radio tick: popped {} added {}", report.popped, report.added);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("radio tick failed: {e}"),
                },
            }

            if let Some(store) = &store {
                let rev = scheduler.revision();
                if saved_rev != Some(rev) {
                    match store.save(scheduler.state().await).await {
                        Ok(()) => saved_rev = Some(rev),
                        Err(e) => warn!("failed to persist radio queue: {e}"),
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
        debug!("radio ticker stopped");
    })
}

/// Run `refresh` now and then every `every` until cancelled.
pub fn spawn_refresher<F, Fut>(name: &'static str, every: Duration, cancel: CancellationToken, refresh: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let mut run = tokio::spawn(refresh());
            tokio::select! {
                _ = cancel.cancelled() => {
                    run.abort();
                    break;
                }
                res = &mut run => match res {
                    Ok(Ok(n)) => debug!("{name} refreshed: {n} item(s)"),
                    Ok(Err(e)) => warn!("{name} refresh failed: {e}"),
                    Err(e) => warn!("{name} refresh task failed: {e}"),
                },
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
        debug!("{name} refresher stopped");
    })
}
