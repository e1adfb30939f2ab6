use log::{debug, info};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::time::format_time;
use crate::types::CurrentlyPlaying;

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const COMPLETION_THRESHOLD: f64 = 0.999;
/// Used when the feed reports a track without a duration.
pub const DEFAULT_DURATION_MS: u64 = 30_000;

/// One observation of playback state, authoritative until replaced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub fetched_at: Instant,
}

impl PlaybackSnapshot {
    pub fn from_playing(playing: &CurrentlyPlaying, fetched_at: Instant) -> Self {
        let duration_ms = match playing.item.duration_ms {
            0 => DEFAULT_DURATION_MS,
            d => d,
        };
        Self {
            is_playing: playing.is_playing,
            position_ms: playing.progress_ms.min(duration_ms),
            duration_ms,
            fetched_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEstimate {
    pub fraction: f64,
    pub elapsed_label: String,
    pub is_playing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Progress(ProgressEstimate),
    /// The one-shot completion for the current snapshot.
    Ended(ProgressEstimate),
    /// Nothing to do: paused, no duration, or already ended.
    Idle,
}

/// Extrapolates playback position from a snapshot and the monotonic clock.
#[derive(Debug, Clone)]
pub struct TrackProgress {
    snapshot: PlaybackSnapshot,
    estimate: ProgressEstimate,
    ended: bool,
}

impl TrackProgress {
    pub fn new(snapshot: PlaybackSnapshot) -> Self {
        let fraction = if snapshot.duration_ms == 0 {
            0.0
        } else {
            (snapshot.position_ms as f64 / snapshot.duration_ms as f64).min(1.0)
        };
        Self {
            estimate: ProgressEstimate {
                fraction,
                elapsed_label: format_time(snapshot.position_ms),
                is_playing: snapshot.is_playing,
            },
            snapshot,
            ended: false,
        }
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    pub fn estimate(&self) -> &ProgressEstimate {
        &self.estimate
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Whether ticking can still change the estimate.
    pub fn is_running(&self) -> bool {
        self.snapshot.is_playing && self.snapshot.duration_ms > 0 && !self.ended
    }

    pub fn tick(&mut self, now: Instant) -> Tick {
        if !self.is_running() {
            return Tick::Idle;
        }

        let elapsed = now.saturating_duration_since(self.snapshot.fetched_at);
        let current_ms = self
            .snapshot
            .position_ms
            .saturating_add(elapsed.as_millis() as u64);
        let fraction = (current_ms as f64 / self.snapshot.duration_ms as f64)
            .min(1.0)
            .max(self.estimate.fraction);

        if fraction >= COMPLETION_THRESHOLD {
            self.ended = true;
            self.estimate = ProgressEstimate {
                fraction: 1.0,
                elapsed_label: format_time(self.snapshot.duration_ms),
                is_playing: false,
            };
            return Tick::Ended(self.estimate.clone());
        }

        self.estimate = ProgressEstimate {
            fraction,
            elapsed_label: format_time(current_ms.min(self.snapshot.duration_ms)),
            is_playing: true,
        };
        Tick::Progress(self.estimate.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEventKind {
    Tick(ProgressEstimate),
    Ended(ProgressEstimate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub generation: u64,
    pub kind: ProgressEventKind,
}

/// Drives a [`TrackProgress`] on a 100 ms interval in a background task.
///
/// Every `reset` cancels the previous task before the new snapshot is adopted
/// and bumps the generation, so a tick already sitting in the channel can be
/// recognised as stale with [`ProgressTicker::is_current`].
pub struct ProgressTicker {
    generation: u64,
    cancel: Option<CancellationToken>,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressTicker {
    pub fn new(events: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            generation: 0,
            cancel: None,
            events,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.cancel.is_some() && generation == self.generation
    }

    pub fn is_ticking(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    /// Adopts a new snapshot and returns its initial estimate.
    pub fn reset(&mut self, snapshot: PlaybackSnapshot) -> ProgressEstimate {
        self.stop();
        self.generation += 1;

        let tracker = TrackProgress::new(snapshot);
        let initial = tracker.estimate().clone();

        if !tracker.is_running() {
            debug!(
                "Progress generation {} is static (playing: {}, duration: {}ms)",
                self.generation, snapshot.is_playing, snapshot.duration_ms
            );
            return initial;
        }

        let token = CancellationToken::new();
        tokio::spawn(tick_loop(
            tracker,
            self.generation,
            token.clone(),
            self.events.clone(),
        ));
        self.cancel = Some(token);
        initial
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    mut tracker: TrackProgress,
    generation: u64,
    token: CancellationToken,
    events: mpsc::UnboundedSender<ProgressEvent>,
) {
    // First tick lands one period after the snapshot, not immediately.
    let mut interval = tokio::time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Progress generation {} cancelled", generation);
                break;
            }
            _ = interval.tick() => {
                let kind = match tracker.tick(Instant::now()) {
                    Tick::Progress(estimate) => ProgressEventKind::Tick(estimate),
                    Tick::Ended(estimate) => {
                        info!("Track finished (generation {})", generation);
                        ProgressEventKind::Ended(estimate)
                    }
                    Tick::Idle => break,
                };
                let ended = matches!(kind, ProgressEventKind::Ended(_));
                if events.send(ProgressEvent { generation, kind }).is_err() || ended {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(is_playing: bool, position_ms: u64, duration_ms: u64, at: Instant) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing,
            position_ms,
            duration_ms,
            fetched_at: at,
        }
    }

    #[test]
    fn initial_fraction_is_exact() {
        let now = Instant::now();
        for (pos, dur) in [(0, 1), (1, 3), (12_345, 200_000), (7, 7)] {
            let progress = TrackProgress::new(snapshot(true, pos, dur, now));
            assert_eq!(progress.estimate().fraction, pos as f64 / dur as f64);
        }
    }

    #[test]
    fn zero_duration_never_progresses() {
        let now = Instant::now();
        let mut progress = TrackProgress::new(snapshot(true, 500, 0, now));
        assert_eq!(progress.estimate().fraction, 0.0);
        assert!(!progress.is_running());
        assert_eq!(progress.tick(now + Duration::from_secs(60)), Tick::Idle);
    }

    #[test]
    fn paused_snapshot_is_static() {
        let now = Instant::now();
        let mut progress = TrackProgress::new(snapshot(false, 3_000, 10_000, now));
        assert_eq!(progress.tick(now + Duration::from_secs(5)), Tick::Idle);
        assert_eq!(progress.estimate().fraction, 0.3);
        assert!(!progress.estimate().is_playing);
    }

    #[test]
    fn half_way_then_ended_exactly_once() {
        let start = Instant::now();
        let mut progress = TrackProgress::new(snapshot(true, 0, 10_000, start));

        match progress.tick(start + Duration::from_millis(5_000)) {
            Tick::Progress(estimate) => {
                assert!((estimate.fraction - 0.5).abs() < 1e-9);
                assert_eq!(estimate.elapsed_label, "0:05");
            }
            other => panic!("expected progress, got {:?}", other),
        }
        assert!(!progress.has_ended());

        match progress.tick(start + Duration::from_millis(10_000)) {
            Tick::Ended(estimate) => {
                assert_eq!(estimate.fraction, 1.0);
                assert!(!estimate.is_playing);
                assert_eq!(estimate.elapsed_label, "0:10");
            }
            other => panic!("expected end, got {:?}", other),
        }
        assert_eq!(progress.tick(start + Duration::from_millis(11_000)), Tick::Idle);
        assert_eq!(progress.estimate().fraction, 1.0);
    }

    #[test]
    fn fraction_is_monotonic_and_bounded() {
        let start = Instant::now();
        let mut progress = TrackProgress::new(snapshot(true, 1_000, 4_000, start));
        let mut last = progress.estimate().fraction;
        for ms in [300, 100, 900, 2_000, 1_500, 2_990, 3_500] {
            if let Tick::Progress(e) | Tick::Ended(e) = progress.tick(start + Duration::from_millis(ms)) {
                assert!(e.fraction >= last);
                assert!(e.fraction <= 1.0);
                last = e.fraction;
            }
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn completion_fires_at_threshold_not_before() {
        let start = Instant::now();
        let mut progress = TrackProgress::new(snapshot(true, 0, 100_000, start));
        assert!(matches!(
            progress.tick(start + Duration::from_millis(99_800)),
            Tick::Progress(_)
        ));
        assert!(matches!(
            progress.tick(start + Duration::from_millis(99_900)),
            Tick::Ended(_)
        ));
    }

    #[test]
    fn missing_duration_gets_default() {
        let playing: CurrentlyPlaying = serde_json::from_value(serde_json::json!({
            "is_playing": true,
            "progress_ms": 0,
            "item": { "id": "t", "name": "n", "album": { "name": "a" } }
        }))
        .unwrap();
        let snap = PlaybackSnapshot::from_playing(&playing, Instant::now());
        assert_eq!(snap.duration_ms, DEFAULT_DURATION_MS);
    }

    #[test]
    fn extreme_position_is_clamped_and_never_overflows() {
        let now = Instant::now();
        let mut progress = TrackProgress::new(snapshot(true, u64::MAX, 200_000, now));
        assert_eq!(progress.estimate().fraction, 1.0);
        assert!(matches!(
            progress.tick(now + Duration::from_secs(1)),
            Tick::Ended(_)
        ));

        let playing: CurrentlyPlaying = serde_json::from_value(serde_json::json!({
            "is_playing": true,
            "progress_ms": u64::MAX,
            "item": { "id": "t", "name": "n", "duration_ms": 200000, "album": { "name": "a" } }
        }))
        .unwrap();
        let snap = PlaybackSnapshot::from_playing(&playing, now);
        assert_eq!(snap.position_ms, 200_000);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = ProgressTicker::new(tx);
        let start = Instant::now();
        ticker.reset(snapshot(true, 200_000, 200_000, start));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, ProgressEventKind::Ended(_)));
        assert!(start.elapsed() >= TICK_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_emits_ticks_then_one_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = ProgressTicker::new(tx);
        let initial = ticker.reset(snapshot(true, 0, 1_000, Instant::now()));
        assert_eq!(initial.fraction, 0.0);

        let mut ends = 0;
        let mut ticks = 0;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.generation, 1);
            match event.kind {
                ProgressEventKind::Tick(_) => ticks += 1,
                ProgressEventKind::Ended(e) => {
                    ends += 1;
                    assert_eq!(e.fraction, 1.0);
                    break;
                }
            }
        }
        assert_eq!(ends, 1);
        assert!(ticks >= 9);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_supersedes_previous_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = ProgressTicker::new(tx);
        ticker.reset(snapshot(true, 0, 60_000, Instant::now()));
        tokio::time::sleep(Duration::from_millis(350)).await;

        ticker.reset(snapshot(true, 0, 60_000, Instant::now()));
        assert!(!ticker.is_current(1));
        assert!(ticker.is_current(2));

        tokio::time::sleep(Duration::from_millis(350)).await;
        ticker.stop();

        let mut saw_new = false;
        while let Ok(event) = rx.try_recv() {
            if event.generation == 2 {
                saw_new = true;
            }
        }
        assert!(saw_new);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn paused_snapshot_spawns_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = ProgressTicker::new(tx);
        ticker.reset(snapshot(false, 0, 10_000, Instant::now()));
        assert!(!ticker.is_ticking());
        assert!(rx.try_recv().is_err());
    }
}
