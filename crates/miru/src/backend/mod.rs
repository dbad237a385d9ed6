//! Collaborator seams: device context, devices, sensors, capture pipeline.
//!
//! The traits here wrap the hardware stack this crate orchestrates but does
//! not implement: device enumeration, stream negotiation, and the blocking
//! capture pipeline live behind them. The `test-source` feature provides a
//! scripted in-memory implementation for tests and development without
//! hardware.
//!
//! A [`CaptureBackend`] value is the process-wide device context. Construct
//! exactly one per process before any device interaction and keep it alive
//! for as long as devices are in use; dropping it tears the context down.
//! There is no hidden singleton behind it.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use crate::profile::{StreamKind, StreamProfile};
use crate::resolve::ResolvedConfig;

#[cfg(any(test, feature = "test-source"))]
pub mod fake;

/// Frameset type produced by a backend's pipeline.
pub type FrameSetOf<B> = <<B as CaptureBackend>::Pipeline as Pipeline>::FrameSet;

/// Well-known device description fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceInfo {
    Name,
    ProductId,
    SerialNumber,
    FirmwareVersion,
    /// Opcode byte for the raw fw-log command, as a decimal string.
    DebugOpCode,
}

/// Raw request/response exchange with device firmware.
///
/// Best-effort by contract: callers must treat every error as non-fatal
/// to streaming.
pub trait DiagnosticChannel {
    fn send_and_receive(&self, request: &[u8]) -> Result<Bytes, DiagnosticError>;
}

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("diagnostic channel rejected request: {0}")]
    Rejected(String),
    #[error("diagnostic i/o failed: {0}")]
    Io(String),
}

/// In-place firmware flashing capability.
pub trait FirmwareUpdateChannel {
    /// Flash `image`, reporting progress in `[0.0, 1.0]`.
    fn update(
        &self,
        image: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), FirmwareUpdateError>;
}

#[derive(Debug, Error)]
pub enum FirmwareUpdateError {
    #[error("firmware image rejected by device: {0}")]
    InvalidImage(String),
    #[error("flash failed: {0}")]
    Flash(String),
}

/// One physical sensor on a device.
pub trait Sensor {
    /// Stream profiles this sensor can produce, in the device's native order.
    ///
    /// The order is what persisted selection indices refer to. It is stable
    /// for a given device + firmware, not across firmware revisions.
    fn profiles(&self) -> Vec<StreamProfile>;
}

/// An enumerated camera device.
///
/// Specialized capabilities are exposed as typed queries returning `None`
/// on devices that lack them, never as runtime downcasts.
pub trait Device {
    type Sensor: Sensor;

    fn info(&self, field: DeviceInfo) -> Option<String>;

    fn sensors(&self) -> Vec<Self::Sensor>;

    /// Raw diagnostic protocol, if this device speaks one.
    fn as_diagnostic(&self) -> Option<&dyn DiagnosticChannel> {
        None
    }

    /// Firmware flashing, if this device supports it.
    fn as_firmware_update(&self) -> Option<&dyn FirmwareUpdateChannel> {
        None
    }
}

/// Cheap per-frame metadata, one entry per active stream in a frameset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub kind: StreamKind,
    pub sensor_index: u8,
    pub frame_number: u64,
    pub timestamp_us: u64,
}

/// One synchronized bundle of frames produced by a single pipeline poll.
///
/// Consumers only ever see a borrowed `&FrameSet` for the duration of a
/// callback; the underlying buffers are recycled once the callback returns,
/// so nothing from it may be retained.
pub trait FrameSet {
    fn frames(&self) -> Vec<FrameInfo>;

    fn frame_count(&self) -> usize {
        self.frames().len()
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("device refused the negotiated profiles: {0}")]
    Rejected(String),
    #[error("pipeline device error: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out waiting for a synchronized frameset")]
    Timeout,
    #[error("frame wait failed: {0}")]
    Device(String),
}

/// The blocking capture pipeline.
///
/// `wait_for_frames` blocks the calling thread up to its timeout and then
/// returns either a frameset or [`WaitError::Timeout`]; it never blocks
/// indefinitely. The handle is released when the value is dropped, and it
/// must be released exactly once.
pub trait Pipeline: Send {
    type FrameSet: FrameSet;

    /// Negotiate and start the given streams. An empty config starts the
    /// device's default streams.
    fn start(&mut self, config: &ResolvedConfig) -> Result<(), PipelineError>;

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<Self::FrameSet, WaitError>;

    fn stop(&mut self);
}

/// Process-wide device context: enumerates devices and creates pipelines.
pub trait CaptureBackend: Send + Sync + 'static {
    type Device: Device + Send;
    type Pipeline: Pipeline + Send;

    /// Currently connected devices, in enumeration order.
    fn devices(&self) -> Vec<Self::Device>;

    /// Open a fresh capture-pipeline handle.
    fn create_pipeline(&self) -> Result<Self::Pipeline, PipelineError>;
}
