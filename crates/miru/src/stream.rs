//! Streaming coordinator: lifecycle, acquisition loop, fw-log loop.
//!
//! Both recurring activities run interleaved on ONE driver context — a
//! blocking task that consumes a tagged task queue. A task re-posts itself
//! after each iteration instead of sleeping in a loop, so `stop()` can
//! deterministically cancel iterations that are queued but not yet run:
//! it cancels the token first (queued tasks check it before touching the
//! session), then enqueues `Stop`, which releases the pipeline handle.
//! That ordering is what makes use-after-release impossible here.
//!
//! The consumer callback runs synchronously on the driver context and
//! delays the next iteration for as long as it runs; keep it fast.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CaptureBackend, Device, DeviceInfo, FrameSetOf};
use crate::catalog::CapabilitySnapshot;
use crate::diag;
use crate::prefs::Preferences;
use crate::resolve::{self, ResolveError, ResolvedConfig};
use crate::session::{AcquireError, SessionError, StreamSession};

/// Consumer callbacks. All of them run synchronously on the driver
/// context; none may block unboundedly.
pub trait StreamListener<F>: Send + Sync {
    /// Inspect the resolved configuration before the pipeline starts.
    fn on_configured(&self, _config: &ResolvedConfig) {}

    /// One synchronized frameset. Borrowed for the duration of the call;
    /// nothing from it may be retained past return.
    fn on_frameset(&self, frames: &F);

    /// Raw fw-log payload from a successful diagnostic poll.
    fn on_diagnostic(&self, _bytes: &[u8]) {}

    /// The acquisition loop terminated on its own. The session stays open
    /// until [`Streamer::stop`] is called; the consumer decides whether to
    /// restart.
    fn on_acquisition_stopped(&self, _reason: &AcquireError) {}
}

#[derive(Debug, Error)]
pub enum StartError {
    #[error("no compatible device connected")]
    DeviceNotFound,
    #[error(transparent)]
    InvalidSelection(#[from] ResolveError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Per-iteration frame wait bound.
    pub frame_timeout: Duration,
    /// Cadence of the best-effort fw-log loop.
    pub fw_log_interval: Duration,
    /// Resolve persisted selections on start. When false the pipeline
    /// starts with device defaults.
    pub load_selections: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            frame_timeout: Duration::from_secs(1),
            fw_log_interval: Duration::from_millis(500),
            load_selections: true,
        }
    }
}

enum Task {
    Acquire,
    FwLog,
    Stop(oneshot::Sender<()>),
}

struct Active {
    tx: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
    driver: tokio::task::JoinHandle<()>,
}

/// Drives a [`StreamSession`] through start/stop and the two recurring
/// loops. `start` and `stop` are both idempotent; at most one session is
/// active per streamer at a time.
pub struct Streamer<B: CaptureBackend> {
    backend: Arc<B>,
    prefs: Arc<dyn Preferences>,
    listener: Arc<dyn StreamListener<FrameSetOf<B>>>,
    config: StreamerConfig,
    active: Mutex<Option<Active>>,
}

impl<B: CaptureBackend> Streamer<B> {
    pub fn new(
        backend: Arc<B>,
        prefs: Arc<dyn Preferences>,
        listener: Arc<dyn StreamListener<FrameSetOf<B>>>,
    ) -> Self {
        Self::with_config(backend, prefs, listener, StreamerConfig::default())
    }

    pub fn with_config(
        backend: Arc<B>,
        prefs: Arc<dyn Preferences>,
        listener: Arc<dyn StreamListener<FrameSetOf<B>>>,
        config: StreamerConfig,
    ) -> Self {
        Self {
            backend,
            prefs,
            listener,
            config,
            active: Mutex::new(None),
        }
    }

    /// Resolve the configuration, start a fresh session, and launch both
    /// loops. No-op when already streaming.
    ///
    /// On any error the pipeline handle has been released before this
    /// returns; retrying is safe.
    pub async fn start(&self) -> Result<(), StartError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            debug!("start ignored, already streaming");
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let prefs = Arc::clone(&self.prefs);
        let listener = Arc::clone(&self.listener);
        let load_selections = self.config.load_selections;

        // Device discovery and the warm-up wait block on hardware; keep
        // them off the async context.
        let (session, device) = tokio::task::spawn_blocking(move || {
            open_session(backend.as_ref(), prefs.as_ref(), listener.as_ref(), load_selections)
        })
        .await
        .map_err(|e| SessionError::Pipeline(format!("session start task failed: {e}")))??;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let driver = spawn_driver(
            session,
            device,
            rx,
            tx.clone(),
            cancel.clone(),
            Arc::clone(&self.listener),
            self.config.clone(),
        );

        // Seed both loops; they keep themselves alive from here.
        let _ = tx.send(Task::Acquire);
        let _ = tx.send(Task::FwLog);

        *active = Some(Active { tx, cancel, driver });
        info!("streaming started");
        Ok(())
    }

    /// Cancel pending loop iterations, then stop the session and release
    /// the pipeline handle. No-op when not streaming.
    ///
    /// An iteration already blocked in a frame wait is allowed to finish
    /// (bounded by its timeout), so stop latency is bounded too. After
    /// this returns, no further listener callback will fire.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(current) = active.take() else {
            debug!("stop ignored, not streaming");
            return;
        };

        // Order matters: cancel queued iterations BEFORE the handle goes
        // away. Anything still in the queue becomes a no-op.
        current.cancel.cancel();

        let (ack_tx, ack_rx) = oneshot::channel();
        if current.tx.send(Task::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        let _ = current.driver.await;
        info!("streaming stopped");
    }

    /// Whether a session is active. Stays true after the acquisition loop
    /// self-terminates, until `stop()` is called.
    pub async fn is_streaming(&self) -> bool {
        self.active.lock().await.is_some()
    }
}

fn open_session<B: CaptureBackend>(
    backend: &B,
    prefs: &dyn Preferences,
    listener: &dyn StreamListener<FrameSetOf<B>>,
    load_selections: bool,
) -> Result<(StreamSession<B>, B::Device), StartError> {
    let mut devices = backend.devices();
    if devices.is_empty() {
        return Err(StartError::DeviceNotFound);
    }
    let device = devices.remove(0);

    let config = if load_selections {
        let snapshot = CapabilitySnapshot::capture(&device);
        let product_id = device.info(DeviceInfo::ProductId).unwrap_or_default();
        resolve::resolve(&snapshot, &product_id, prefs)?
    } else {
        ResolvedConfig::empty()
    };
    listener.on_configured(&config);

    let session = StreamSession::configure_and_start(backend, config)?;
    Ok((session, device))
}

fn spawn_driver<B: CaptureBackend>(
    session: StreamSession<B>,
    device: B::Device,
    rx: mpsc::UnboundedReceiver<Task>,
    tx: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
    listener: Arc<dyn StreamListener<FrameSetOf<B>>>,
    config: StreamerConfig,
) -> tokio::task::JoinHandle<()> {
    let rt = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || {
        drive(session, device, rx, tx, cancel, listener, config, rt)
    })
}

/// The single cooperative execution context: tasks from the queue run here
/// one at a time, in order, never in parallel with each other.
#[allow(clippy::too_many_arguments)]
fn drive<B: CaptureBackend>(
    mut session: StreamSession<B>,
    device: B::Device,
    mut rx: mpsc::UnboundedReceiver<Task>,
    tx: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
    listener: Arc<dyn StreamListener<FrameSetOf<B>>>,
    config: StreamerConfig,
    rt: tokio::runtime::Handle,
) {
    while let Some(task) = rx.blocking_recv() {
        match task {
            Task::Stop(ack) => {
                session.stop();
                let _ = ack.send(());
                break;
            }
            // A cancelled continuation must never touch the session again.
            _ if cancel.is_cancelled() => continue,
            Task::Acquire => match session.wait_for_frameset(config.frame_timeout) {
                Ok(frames) => {
                    listener.on_frameset(&frames);
                    let _ = tx.send(Task::Acquire);
                }
                Err(reason) => {
                    // No busy retry: a stuck device surfaces as "streaming
                    // stopped", and the session stays open for an explicit
                    // stop() or restart.
                    warn!(%reason, "acquisition loop terminating");
                    listener.on_acquisition_stopped(&reason);
                }
            },
            Task::FwLog => {
                match diag::poll_fw_logs(&device) {
                    Ok(Some(bytes)) => listener.on_diagnostic(&bytes),
                    Ok(None) => debug!("device has no diagnostic channel"),
                    // Best effort: never fatal to streaming.
                    Err(e) => debug!("fw-log poll failed: {e}"),
                }
                // The timer only re-enqueues; the body always runs here.
                let tx = tx.clone();
                let interval = config.fw_log_interval;
                rt.spawn(async move {
                    tokio::time::sleep(interval).await;
                    let _ = tx.send(Task::FwLog);
                });
            }
        }
    }
    debug!("stream driver exited");
}
