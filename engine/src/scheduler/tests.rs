use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use super::*;
use crate::track::{Locator, TrackSource};

fn track(name: &str, dur: f64) -> TrackCandidate {
    let mut c = TrackCandidate::new(TrackSource::Archive, Locator::Path(format!("/music/{name}.mp3").into()), dur);
    c.display_name = name.to_string();
    c
}

/// Hands out a fixed list, then nothing.
struct Scripted {
    queue: StdMutex<VecDeque<TrackCandidate>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(tracks: Vec<TrackCandidate>) -> Arc<Self> {
        Arc::new(Self { queue: StdMutex::new(tracks.into()), calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl TrackPicker for Scripted {
    async fn pick(&self) -> Option<TrackCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().unwrap().pop_front()
    }
}

/// Always returns the same track.
struct Stuck(TrackCandidate, AtomicUsize);

#[async_trait]
impl TrackPicker for Stuck {
    async fn pick(&self) -> Option<TrackCandidate> {
        self.1.fetch_add(1, Ordering::SeqCst);
        Some(self.0.clone())
    }
}

#[derive(Clone, Default)]
struct TestClock(Arc<AtomicU64>);

impl TestClock {
    fn set(&self, t: f64) {
        self.0.store(t.to_bits(), Ordering::SeqCst);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

fn scheduler(picker: Arc<dyn TrackPicker>, target: usize, clock: &TestClock) -> Scheduler {
    let c = clock.clone();
    Scheduler::new(picker, target).with_clock(move || c.get())
}

#[tokio::test]
async fn three_track_scenario() {
    let clock = TestClock::default();
    clock.set(0.0);
    let picker = Scripted::new(vec![track("A", 10.0), track("B", 15.0), track("C", 20.0)]);
    let s = scheduler(picker, 10, &clock);

    assert_eq!(s.refill().await, 3);
    let st = s.state().await;
    let names: Vec<&str> = st.queue().iter().map(|e| e.track.display_name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_eq!(st.started_at(), Some(0.0));

    assert_eq!(s.advance_to(10.0).await, 1);
    assert_eq!(s.state().await.started_at(), Some(10.0));

    // B ends at 25; nothing to pop at 24.
    assert_eq!(s.advance_to(24.0).await, 0);
    assert_eq!(s.state().await.started_at(), Some(10.0));

    // A late tick anchors C at B's end, not at the tick time.
    assert_eq!(s.advance_to(26.0).await, 1);
    assert_eq!(s.state().await.started_at(), Some(25.0));

    clock.set(26.0);
    let snap = s.snapshot().await.unwrap();
    assert_eq!(snap.now_playing.track.display_name, "C");
    assert_eq!(snap.now_playing.started_at, 25.0);
    assert_eq!(snap.now_playing.elapsed, 1.0);
    assert_eq!(snap.now_playing.remaining, 19.0);
    assert_eq!(snap.now_playing.server_time, 26.0);
    assert_eq!(snap.queue_len, 1);
}

#[test]
fn one_late_advance_pops_several_without_drift() {
    let mut st = RadioState::new();
    for (i, d) in [30.0, 40.0, 50.0, 60.0].into_iter().enumerate() {
        assert!(st.push(QueueEntry::new(track(&format!("t{i}"), d), 100.0), 100.0));
    }
    assert_eq!(st.started_at(), Some(100.0));

    // 100 + 30 + 40 + 50 = 220
    assert_eq!(st.advance(221.5), 3);
    assert_eq!(st.started_at(), Some(220.0));
    assert_eq!(st.queue().front().unwrap().track.display_name, "t3");

    assert_eq!(st.advance(280.0), 1);
    assert!(st.is_empty());
    assert_eq!(st.started_at(), None);
}

#[test]
fn advance_is_bounded() {
    let mut st = RadioState::new();
    for i in 0..150 {
        st.push(QueueEntry::new(track(&format!("t{i}"), 5.0), 0.0), 0.0);
    }
    assert_eq!(st.advance(1e9), MAX_ADVANCE_POPS);
    assert_eq!(st.len(), 50);
    assert_eq!(st.started_at(), Some(500.0));
}

#[test]
fn push_rejects_duplicate_key() {
    let mut st = RadioState::new();
    assert!(st.push(QueueEntry::new(track("A", 10.0), 0.0), 0.0));
    assert!(!st.push(QueueEntry::new(track("A", 99.0), 1.0), 1.0));

    // Same path, different display name is a different track.
    let mut other = track("A", 10.0);
    other.display_name = "A (live)".into();
    assert!(st.push(QueueEntry::new(other, 2.0), 2.0));
    assert_eq!(st.len(), 2);
}

#[test]
fn empty_state_has_no_snapshot() {
    let st = RadioState::new();
    assert!(st.snapshot(10.0).is_none());
    assert!(st.queue_view(10.0).items.is_empty());
}

#[test]
fn queue_view_projects_start_times() {
    let mut st = RadioState::new();
    st.push(QueueEntry::new(track("A", 10.0), 50.0), 50.0);
    st.push(QueueEntry::new(track("B", 15.0), 50.0), 50.0);
    st.push(QueueEntry::new(track("C", 20.0), 50.0), 50.0);

    let v = st.queue_view(55.0);
    let starts: Vec<f64> = v.items.iter().map(|s| s.starts_at).collect();
    assert_eq!(starts, vec![50.0, 60.0, 75.0]);
    assert_eq!(v.items[2].ends_at, 95.0);
    assert_eq!(v.started_at, Some(50.0));
}

#[test]
fn restore_normalizes() {
    let a = QueueEntry::new(track("A", 10.0), 0.0);
    let dup = QueueEntry::new(track("A", 10.0), 0.0);
    let st = RadioState::restore(vec![a, dup], None, 42.0);
    assert_eq!(st.len(), 1);
    assert_eq!(st.started_at(), Some(42.0));

    let st = RadioState::restore(Vec::new(), Some(7.0), 42.0);
    assert!(st.is_empty());
    assert_eq!(st.started_at(), None);
}

#[tokio::test]
async fn refill_skips_repeats_and_bounds_attempts() {
    let clock = TestClock::default();
    clock.set(5.0);
    let picker = Arc::new(Stuck(track("same", 30.0), AtomicUsize::new(0)));
    let s = scheduler(picker.clone(), 4, &clock);

    assert_eq!(s.refill().await, 1);
    assert_eq!(picker.1.load(Ordering::SeqCst), 4 * REFILL_ATTEMPT_FACTOR);

    // Already queued: nothing new.
    assert_eq!(s.refill().await, 0);
    assert_eq!(s.state().await.len(), 1);
}

#[tokio::test]
async fn refill_stops_at_target() {
    let clock = TestClock::default();
    let tracks = (0..20).map(|i| track(&format!("t{i}"), 30.0)).collect();
    let picker = Scripted::new(tracks);
    let s = scheduler(picker.clone(), 5, &clock);

    assert_eq!(s.refill().await, 5);
    assert_eq!(picker.calls.load(Ordering::SeqCst), 5);
    assert_eq!(s.refill().await, 0);
    assert_eq!(s.state().await.len(), 5);
}

#[tokio::test]
async fn snapshot_fills_an_empty_station() {
    let clock = TestClock::default();
    clock.set(1000.0);
    let picker = Scripted::new(vec![track("A", 60.0)]);
    let s = scheduler(picker, 10, &clock);

    let snap = s.snapshot().await.unwrap();
    assert_eq!(snap.now_playing.track.display_name, "A");
    assert_eq!(snap.now_playing.started_at, 1000.0);
    assert_eq!(snap.now_playing.remaining, 60.0);

    clock.set(1061.0);
    assert!(s.snapshot().await.is_none());
}

#[tokio::test]
async fn tick_reports_changes_and_bumps_revision() {
    let clock = TestClock::default();
    clock.set(0.0);
    let picker = Scripted::new(vec![track("A", 10.0), track("B", 10.0)]);
    let s = scheduler(picker, 10, &clock);

    let r0 = s.revision();
    let rep = s.tick().await;
    assert_eq!(rep, TickReport { popped: 0, added: 2 });
    assert!(s.revision() > r0);

    let r1 = s.revision();
    clock.set(5.0);
    assert!(!s.tick().await.changed());
    assert_eq!(s.revision(), r1);

    clock.set(12.0);
    assert_eq!(s.tick().await.popped, 1);
}

/// Random source that can be switched off.
struct Flaky {
    rng: StdMutex<fastrand::Rng>,
    on: AtomicBool,
}

#[async_trait]
impl TrackPicker for Flaky {
    async fn pick(&self) -> Option<TrackCandidate> {
        if !self.on.load(Ordering::SeqCst) {
            return None;
        }
        let mut rng = self.rng.lock().unwrap();
        // Small name space so duplicates actually happen.
        let name = format!("s{}", rng.u32(..40));
        Some(track(&name, rng.f64() * 400.0))
    }
}

#[tokio::test]
async fn started_at_set_iff_queue_non_empty() {
    let mut rng = fastrand::Rng::with_seed(7);
    let picker = Arc::new(Flaky { rng: StdMutex::new(fastrand::Rng::with_seed(11)), on: AtomicBool::new(true) });
    let clock = TestClock::default();
    let s = scheduler(picker.clone(), 6, &clock);

    let mut now = 1.0;
    for _ in 0..400 {
        match rng.u8(..4) {
            0 => picker.on.store(rng.bool(), Ordering::SeqCst),
            1 | 2 => {
                now += rng.f64() * 300.0;
                clock.set(now);
                s.advance_to(now).await;
            }
            _ => {
                clock.set(now);
                s.refill().await;
            }
        }

        let st = s.state().await;
        assert_eq!(st.started_at().is_none(), st.is_empty(), "{st:?}");
        assert!(st.len() <= 6);
        if let (Some(start), Some(front)) = (st.started_at(), st.queue().front()) {
            assert!(now - start < resolve_duration(front.track.duration_seconds));
        }
        let keys: HashSet<DedupKey> = st.queue().iter().map(|e| e.track.dedup_key()).collect();
        assert_eq!(keys.len(), st.len());
    }
}

/// Like `Flaky`, but every pick yields to the runtime first.
struct Slow {
    rng: StdMutex<fastrand::Rng>,
    calls: AtomicUsize,
}

#[async_trait]
impl TrackPicker for Slow {
    async fn pick(&self) -> Option<TrackCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (name, dur) = {
            let mut rng = self.rng.lock().unwrap();
            (format!("s{}", rng.u32(..12)), 1.0 + rng.f64() * 4.0)
        };
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        Some(track(&name, dur))
    }
}

fn check(st: &RadioState, target: usize) {
    assert!(st.len() <= target, "{} > {target}", st.len());
    assert_eq!(st.started_at().is_none(), st.is_empty(), "{st:?}");
    let keys: HashSet<DedupKey> = st.queue().iter().map(|e| e.track.dedup_key()).collect();
    assert_eq!(keys.len(), st.len(), "duplicate in {st:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ticks_reads_and_refills_keep_the_queue_sound() {
    const TARGET: usize = 5;
    let picker = Arc::new(Slow { rng: StdMutex::new(fastrand::Rng::with_seed(3)), calls: AtomicUsize::new(0) });
    let clock = TestClock::default();
    clock.set(1.0);
    let s = Arc::new(scheduler(picker.clone(), TARGET, &clock));

    let mut tasks = Vec::new();
    for i in 0..40 {
        let s = s.clone();
        let clock = clock.clone();
        tasks.push(tokio::spawn(async move {
            match i % 3 {
                0 => {
                    let step = clock.get() + 0.7;
                    clock.set(step);
                    s.tick().await;
                }
                1 => {
                    if let Some(snap) = s.snapshot().await {
                        assert!(snap.queue_len <= TARGET);
                        assert!(snap.now_playing.remaining >= 0.0);
                    }
                }
                _ => {
                    s.refill().await;
                }
            }
            check(&s.state().await, TARGET);
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    check(&s.state().await, TARGET);
    assert!(picker.calls.load(Ordering::SeqCst) > 0);
    assert!(!s.state().await.is_empty());
}
