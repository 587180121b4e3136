//! Playback scheduler.
//!
//! The station is one [`RadioState`]: a bounded queue whose front is on air,
//! plus the wall-clock time the front started. `started_at` is set exactly when
//! the queue is non-empty. All mutation goes through [`Scheduler`], which holds
//! the state behind a single mutex.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::mpeg::resolve_duration;
use crate::sources::TrackPicker;
use crate::track::{now_epoch_secs, DedupKey, QueueEntry, TrackCandidate};

/// Upper bound on entries popped by one `advance`.
pub const MAX_ADVANCE_POPS: usize = 100;

/// `refill` gives up after `target_len * REFILL_ATTEMPT_FACTOR` draws.
pub const REFILL_ATTEMPT_FACTOR: usize = 6;

pub const DEFAULT_QUEUE_LEN: usize = 10;

// --- State ------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioState {
    queue: VecDeque<QueueEntry>,
    started_at: Option<f64>,
}

fn entry_duration(e: &QueueEntry) -> f64 {
    resolve_duration(e.track.duration_seconds)
}

impl RadioState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from persisted parts. Duplicate keys are dropped and a
    /// missing start time on a non-empty queue becomes `now`.
    pub fn restore(entries: impl IntoIterator<Item = QueueEntry>, started_at: Option<f64>, now: f64) -> Self {
        let mut st = Self::new();
        for e in entries {
            st.push(e, now);
        }
        if !st.queue.is_empty() {
            st.started_at = started_at.filter(|t| t.is_finite() && *t > 0.0).or(Some(now));
        }
        st
    }

    pub fn queue(&self) -> &VecDeque<QueueEntry> {
        &self.queue
    }

    pub fn started_at(&self) -> Option<f64> {
        self.started_at
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.queue.iter().any(|e| &e.track.dedup_key() == key)
    }

    /// Append unless an entry with the same dedup key is queued. Pushing onto
    /// an empty queue starts playback at `now`.
    pub fn push(&mut self, entry: QueueEntry, now: f64) -> bool {
        if self.contains(&entry.track.dedup_key()) {
            return false;
        }
        if self.queue.is_empty() {
            self.started_at = Some(now);
        }
        self.queue.push_back(entry);
        true
    }

    /// Pop every entry that has finished by `now`. Each following entry starts
    /// at the exact end of the one before it, however late the call is.
    /// Returns the number of entries popped.
    pub fn advance(&mut self, now: f64) -> usize {
        if self.queue.is_empty() {
            self.started_at = None;
            return 0;
        }
        let mut start = self.started_at.unwrap_or(now);

        let mut popped = 0;
        while popped < MAX_ADVANCE_POPS {
            let Some(front) = self.queue.front() else {
                break;
            };
            let end = start + entry_duration(front);
            if now < end {
                break;
            }
            self.queue.pop_front();
            start = end;
            popped += 1;
        }

        self.started_at = if self.queue.is_empty() { None } else { Some(start) };
        popped
    }

    /// Playhead of the front entry at `now`, without advancing.
    pub fn snapshot(&self, now: f64) -> Option<Snapshot> {
        let front = self.queue.front()?;
        let started_at = self.started_at.unwrap_or(now);
        let duration = entry_duration(front);
        let elapsed = (now - started_at).max(0.0);
        Some(Snapshot {
            now_playing: NowPlaying {
                id: front.id,
                track: front.track.clone(),
                queued_at: front.queued_at,
                started_at,
                server_time: now,
                elapsed,
                remaining: (duration - elapsed).max(0.0),
            },
            queue_len: self.queue.len(),
        })
    }

    /// Every queued entry with its projected start and end.
    pub fn queue_view(&self, now: f64) -> QueueView {
        let mut at = self.started_at.unwrap_or(now);
        let items = self
            .queue
            .iter()
            .enumerate()
            .map(|(position, e)| {
                let starts_at = at;
                at += entry_duration(e);
                QueueSlot {
                    position,
                    id: e.id,
                    track: e.track.clone(),
                    queued_at: e.queued_at,
                    starts_at,
                    ends_at: at,
                }
            })
            .collect();
        QueueView { server_time: now, started_at: self.started_at, items }
    }
}

// --- Views ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub id: Uuid,
    #[serde(flatten)]
    pub track: TrackCandidate,
    pub queued_at: f64,
    pub started_at: f64,
    pub server_time: f64,
    pub elapsed: f64,
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub now_playing: NowPlaying,
    pub queue_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSlot {
    pub position: usize,
    pub id: Uuid,
    #[serde(flatten)]
    pub track: TrackCandidate,
    pub queued_at: f64,
    pub starts_at: f64,
    pub ends_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueView {
    pub server_time: f64,
    pub started_at: Option<f64>,
    pub items: Vec<QueueSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub popped: usize,
    pub added: usize,
}

impl TickReport {
    pub fn changed(&self) -> bool {
        self.popped > 0 || self.added > 0
    }
}

// --- Service ----------------------------------------------------------------

pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

pub struct Scheduler {
    state: Mutex<RadioState>,
    /// Serializes refills so two concurrent callers can't overshoot the target.
    refill_gate: Mutex<()>,
    picker: Arc<dyn TrackPicker>,
    target_len: usize,
    clock: Clock,
    revision: AtomicU64,
}

impl Scheduler {
    pub fn new(picker: Arc<dyn TrackPicker>, target_len: usize) -> Self {
        Self {
            state: Mutex::new(RadioState::new()),
            refill_gate: Mutex::new(()),
            picker,
            target_len: target_len.max(1),
            clock: Arc::new(now_epoch_secs),
            revision: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        let clock: Clock = Arc::new(clock);
        self.clock = clock;
        self
    }

    pub fn now(&self) -> f64 {
        (self.clock)()
    }

    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Bumped on every change to the queue.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace the state (startup restore), advancing it to now.
    pub async fn restore(&self, mut state: RadioState) -> usize {
        let popped = state.advance(self.now());
        *self.state.lock().await = state;
        self.bump();
        popped
    }

    pub async fn state(&self) -> RadioState {
        self.state.lock().await.clone()
    }

    pub async fn advance_to(&self, now: f64) -> usize {
        let popped = self.state.lock().await.advance(now);
        if popped > 0 {
            self.bump();
        }
        popped
    }

    /// Top the queue up to the target length. Candidates are drawn (and probed)
    /// without holding the state lock, then committed in one step.
    pub async fn refill(&self) -> usize {
        // Only one refill runs at a time. Without this, two callers could both
        // see the same shortfall and each draw enough to fill it. Advancing
        // and reading never take the gate, so they don't wait on a slow pick.
        let _gate = self.refill_gate.lock().await;

        let (mut seen, missing) = {
            let st = self.state.lock().await;
            let seen: HashSet<DedupKey> = st.queue().iter().map(|e| e.track.dedup_key()).collect();
            (seen, self.target_len.saturating_sub(st.len()))
        };
        if missing == 0 {
            return 0;
        }

        // Picks can hit the network (remote probing), so draw with the state
        // lock released. Readers keep getting snapshots meanwhile, and the
        // queue may advance under us; the commit below re-checks both the
        // target and duplicates against whatever the queue holds by then.
        let mut drawn = Vec::with_capacity(missing);
        let mut attempts = 0;
        while drawn.len() < missing && attempts < self.target_len * REFILL_ATTEMPT_FACTOR {
            attempts += 1;
            let Some(c) = self.picker.pick().await else {
                break;
            };
            if !seen.insert(c.dedup_key()) {
                continue;
            }
            drawn.push(c);
        }
        if drawn.is_empty() {
            tracing::debug!("refill: nothing drawn after {attempts} attempts");
            return 0;
        }

        let mut st = self.state.lock().await;
        // Read the clock after locking: a fresh entry on an empty queue
        // starts playing now, not when the draw began.
        let now = self.now();
        let mut added = 0;
        for c in drawn {
            if st.len() >= self.target_len {
                break;
            }
            if st.push(QueueEntry::new(c, now), now) {
                added += 1;
            }
        }
        drop(st);

        if added > 0 {
            self.bump();
        }
        added
    }

    /// Background tick: advance to now, then top up.
    pub async fn tick(&self) -> TickReport {
        let popped = self.advance_to(self.now()).await;
        let added = self.refill().await;
        TickReport { popped, added }
    }

    /// Foreground read. An empty station is filled first so the first listener
    /// doesn't wait a whole tick; otherwise this only advances.
    pub async fn snapshot(&self) -> Option<Snapshot> {
        if self.state.lock().await.is_empty() {
            self.refill().await;
        }
        let now = self.now();
        let mut st = self.state.lock().await;
        if st.advance(now) > 0 {
            self.bump();
        }
        st.snapshot(now)
    }

    pub async fn queue_view(&self) -> QueueView {
        let now = self.now();
        let mut st = self.state.lock().await;
        if st.advance(now) > 0 {
            self.bump();
        }
        st.queue_view(now)
    }
}

#[cfg(test)]
mod tests;
