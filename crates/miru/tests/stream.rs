//! Lifecycle regression tests for the streaming coordinator, driven
//! entirely through the scripted backend (no hardware).
//!
//! Run: `cargo test -p miru --features test-source --test stream`

#![cfg(feature = "test-source")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use miru::backend::fake::{FakeBackend, FakeFrameSet};
use miru::backend::FrameSet;
use miru::prefs::{MemoryPrefs, Preferences, StreamSelection};
use miru::{
    AcquireError, ResolvedConfig, SelectionKey, SessionError, StartError, StreamKind,
    StreamListener, Streamer,
};

// ── Shared helpers ───────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    configured: Mutex<Option<ResolvedConfig>>,
    framesets: AtomicUsize,
    frame_numbers: Mutex<Vec<u64>>,
    diagnostics: AtomicUsize,
    loop_stops: AtomicUsize,
}

impl StreamListener<FakeFrameSet> for Recorder {
    fn on_configured(&self, config: &ResolvedConfig) {
        *self.configured.lock().unwrap() = Some(config.clone());
    }

    fn on_frameset(&self, frames: &FakeFrameSet) {
        if let Some(first) = frames.frames().first() {
            self.frame_numbers.lock().unwrap().push(first.frame_number);
        }
        self.framesets.fetch_add(1, Ordering::SeqCst);
    }

    fn on_diagnostic(&self, _bytes: &[u8]) {
        self.diagnostics.fetch_add(1, Ordering::SeqCst);
    }

    fn on_acquisition_stopped(&self, _reason: &AcquireError) {
        self.loop_stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn rig(backend: FakeBackend) -> (Arc<FakeBackend>, Arc<Recorder>, Streamer<FakeBackend>) {
    rig_with_prefs(backend, MemoryPrefs::new())
}

fn rig_with_prefs(
    backend: FakeBackend,
    prefs: MemoryPrefs,
) -> (Arc<FakeBackend>, Arc<Recorder>, Streamer<FakeBackend>) {
    let backend = Arc::new(backend);
    let recorder = Arc::new(Recorder::default());
    let streamer = Streamer::new(
        Arc::clone(&backend),
        Arc::new(prefs) as Arc<dyn Preferences>,
        Arc::clone(&recorder) as Arc<dyn StreamListener<FakeFrameSet>>,
    );
    (backend, recorder, streamer)
}

fn enable(prefs: &MemoryPrefs, kind: StreamKind, sensor_index: u8, chosen_index: i64) {
    prefs.set_selection(
        &SelectionKey::new(FakeBackend::PRODUCT_ID, kind, sensor_index),
        StreamSelection {
            enabled: true,
            chosen_index,
        },
    );
}

async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn start_is_idempotent() {
    let (backend, _recorder, streamer) = rig(FakeBackend::new());

    streamer.start().await.unwrap();
    streamer.start().await.unwrap();
    assert_eq!(backend.opens(), 1, "second start must not open a second handle");
    assert!(streamer.is_streaming().await);

    streamer.stop().await;
    assert_eq!(backend.closes(), 1);
    assert!(!streamer.is_streaming().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_start_is_a_noop() {
    let (backend, _recorder, streamer) = rig(FakeBackend::new());
    streamer.stop().await;
    streamer.stop().await;
    assert_eq!(backend.opens(), 0);
    assert_eq!(backend.closes(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn framesets_flow_in_order_until_stop() {
    let (backend, recorder, streamer) = rig(FakeBackend::new());
    streamer.start().await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.framesets.load(Ordering::SeqCst) >= 5
        })
        .await,
        "expected at least 5 framesets"
    );

    streamer.stop().await;
    let delivered = recorder.framesets.load(Ordering::SeqCst);

    // No callback may fire after stop() has returned.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.framesets.load(Ordering::SeqCst), delivered);

    let numbers = recorder.frame_numbers.lock().unwrap().clone();
    assert!(
        numbers.windows(2).all(|w| w[0] < w[1]),
        "framesets arrived out of production order: {numbers:?}"
    );

    assert_eq!(backend.opens(), 1);
    assert_eq!(backend.closes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_after_stop_opens_a_fresh_handle() {
    let (backend, recorder, streamer) = rig(FakeBackend::new());

    streamer.start().await.unwrap();
    streamer.stop().await;
    streamer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.framesets.load(Ordering::SeqCst) >= 1
        })
        .await
    );
    streamer.stop().await;

    assert_eq!(backend.opens(), 2);
    assert_eq!(backend.closes(), 2);
}

// ── Start failure paths ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn warmup_timeout_fails_start_without_leaking() {
    let (backend, _recorder, streamer) = rig(FakeBackend::new());
    backend.fail_warmup();

    let err = streamer.start().await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Session(SessionError::FirstFrameTimeout)
    ));
    assert_eq!(backend.opens(), 1);
    assert_eq!(backend.closes(), 1, "failed start must release the handle");
    assert!(!streamer.is_streaming().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_config_fails_start_without_leaking() {
    let (backend, _recorder, streamer) = rig(FakeBackend::new());
    backend.reject_config();

    let err = streamer.start().await.unwrap_err();
    assert!(matches!(
        err,
        StartError::Session(SessionError::ConfigurationRejected(_))
    ));
    assert_eq!(backend.opens(), backend.closes());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_device_fails_start() {
    let (backend, _recorder, streamer) = rig(FakeBackend::without_device());
    let err = streamer.start().await.unwrap_err();
    assert!(matches!(err, StartError::DeviceNotFound));
    assert_eq!(backend.opens(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_selection_fails_before_the_pipeline_opens() {
    let prefs = MemoryPrefs::new();
    enable(&prefs, StreamKind::Color, 0, 5); // device offers 3 color profiles
    let (backend, _recorder, streamer) = rig_with_prefs(FakeBackend::new(), prefs);

    let err = streamer.start().await.unwrap_err();
    assert!(matches!(err, StartError::InvalidSelection(_)));
    assert_eq!(backend.opens(), 0, "resolution fails before any handle is opened");
}

// ── Configuration resolution end to end ──────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn resolved_selection_reaches_the_pipeline() {
    let prefs = MemoryPrefs::new();
    enable(&prefs, StreamKind::Depth, 0, 1); // 640x480 Z16
    let (_backend, recorder, streamer) = rig_with_prefs(FakeBackend::new(), prefs);

    streamer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.framesets.load(Ordering::SeqCst) >= 2
        })
        .await
    );
    streamer.stop().await;

    let config = recorder.configured.lock().unwrap().clone().unwrap();
    assert_eq!(config.len(), 1);
    let profile = &config.profiles()[0];
    assert_eq!(profile.kind, StreamKind::Depth);
    assert_eq!((profile.width, profile.height), (640, 480));
}

// ── Steady-state failure policy ──────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn acquisition_timeout_terminates_the_loop_but_not_the_session() {
    let (backend, recorder, streamer) = rig(FakeBackend::new());
    // Warm-up consumes the first wait; two framesets flow, then timeout.
    backend.limit_framesets(3);

    streamer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.loop_stops.load(Ordering::SeqCst) == 1
        })
        .await,
        "acquisition loop should terminate exactly once"
    );

    assert_eq!(recorder.framesets.load(Ordering::SeqCst), 2);
    assert!(streamer.is_streaming().await, "session stays open after loop death");
    assert_eq!(backend.closes(), 0);

    streamer.stop().await;
    assert_eq!(backend.closes(), 1);
}

// ── Diagnostic loop ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn fw_log_polls_use_the_device_opcode() {
    let (backend, recorder, streamer) = rig(FakeBackend::new());
    streamer.start().await.unwrap();

    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.diagnostics.load(Ordering::SeqCst) >= 1
        })
        .await
    );
    streamer.stop().await;

    let requests = backend.diag_requests();
    assert!(!requests.is_empty());
    // Fake device advertises opcode 21 in its info block.
    assert_eq!(requests[0], miru::diag::fw_log_request(21).to_vec());
}

#[tokio::test(flavor = "multi_thread")]
async fn diagnostic_failures_never_affect_acquisition() {
    let (backend, recorder, streamer) = rig(FakeBackend::new());
    backend.fail_diagnostics();

    streamer.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            recorder.framesets.load(Ordering::SeqCst) >= 5
                && !backend.diag_requests().is_empty()
        })
        .await,
        "frames must keep flowing while diagnostics fail"
    );
    streamer.stop().await;

    assert_eq!(recorder.diagnostics.load(Ordering::SeqCst), 0);
    assert!(recorder.framesets.load(Ordering::SeqCst) >= 5);
}
