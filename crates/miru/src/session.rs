//! Stream session: exclusive owner of one capture-pipeline handle.
//!
//! State machine: `Closed → Starting → Open → Stopping → Closed`, with
//! `Closed` re-entered after a failed start. The pipeline handle exists
//! only between a successful `configure_and_start` and the matching
//! `stop` (or drop); every failure path releases it before returning.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{CaptureBackend, FrameSetOf, Pipeline, PipelineError, WaitError};
use crate::resolve::ResolvedConfig;

/// How long the warm-up frame wait may take. Generous on purpose: some
/// devices only commit stream negotiation on the first wait.
pub const WARMUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Starting,
    Open,
    Stopping,
}

/// Fatal-to-start errors. Whichever of these comes back, the pipeline
/// handle has already been released; the caller may retry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device refused the negotiated stream profiles: {0}")]
    ConfigurationRejected(String),
    #[error("no frameset arrived within the warm-up window")]
    FirstFrameTimeout,
    #[error("pipeline failed: {0}")]
    Pipeline(String),
}

/// Steady-state acquisition failures. These terminate the acquisition
/// loop but leave the session open; the caller decides whether to stop.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("session is not open")]
    NotOpen,
    #[error("timed out waiting for a synchronized frameset")]
    Timeout,
    #[error("frame acquisition failed: {0}")]
    Device(String),
}

pub struct StreamSession<B: CaptureBackend> {
    state: SessionState,
    pipeline: Option<B::Pipeline>,
    config: ResolvedConfig,
}

impl<B: CaptureBackend> StreamSession<B> {
    /// Open a pipeline, apply `config` (device defaults if empty), and wait
    /// for the warm-up frame.
    ///
    /// Returns an `Open` session, or an error with the handle released.
    pub fn configure_and_start(backend: &B, config: ResolvedConfig) -> Result<Self, SessionError> {
        let mut session = Self {
            state: SessionState::Starting,
            pipeline: None,
            config,
        };
        match session.try_start(backend) {
            Ok(()) => {
                session.state = SessionState::Open;
                info!(streams = session.config.len(), "stream session open");
                Ok(session)
            }
            Err(e) => {
                warn!("session start failed: {e}");
                session.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    fn try_start(&mut self, backend: &B) -> Result<(), SessionError> {
        let mut pipeline = backend
            .create_pipeline()
            .map_err(|e| SessionError::Pipeline(e.to_string()))?;

        // From here on, any early return drops `pipeline`, releasing the handle.
        pipeline.start(&self.config).map_err(|e| match e {
            PipelineError::Rejected(msg) => SessionError::ConfigurationRejected(msg),
            PipelineError::Device(msg) => SessionError::Pipeline(msg),
        })?;

        match pipeline.wait_for_frames(WARMUP_TIMEOUT) {
            Ok(_) => {}
            Err(WaitError::Timeout) => {
                pipeline.stop();
                return Err(SessionError::FirstFrameTimeout);
            }
            Err(WaitError::Device(msg)) => {
                pipeline.stop();
                return Err(SessionError::Pipeline(msg));
            }
        }

        self.pipeline = Some(pipeline);
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// The configuration this session was started with.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Block up to `timeout` for the next synchronized frameset.
    /// Valid only while the session is `Open`.
    pub fn wait_for_frameset(&mut self, timeout: Duration) -> Result<FrameSetOf<B>, AcquireError> {
        let pipeline = match (&self.state, self.pipeline.as_mut()) {
            (SessionState::Open, Some(pipeline)) => pipeline,
            _ => return Err(AcquireError::NotOpen),
        };
        pipeline.wait_for_frames(timeout).map_err(|e| match e {
            WaitError::Timeout => AcquireError::Timeout,
            WaitError::Device(msg) => AcquireError::Device(msg),
        })
    }

    /// Stop streaming and release the handle. No-op when already closed.
    pub fn stop(&mut self) {
        if self.state != SessionState::Open {
            return;
        }
        self.state = SessionState::Stopping;
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
        self.state = SessionState::Closed;
        debug!("stream session closed");
    }
}

// Manual impl: `B` is only a type-level tag here and need not be `Debug`.
impl<B: CaptureBackend> fmt::Debug for StreamSession<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &self.state)
            .field("pipeline", &self.pipeline.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl<B: CaptureBackend> Drop for StreamSession<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
