//! Hardware-free scripted capture backend.
//!
//! Stands in for a real device stack in tests and development: a fixed
//! capability set, synthetic framesets at ~200fps, and counters/knobs for
//! asserting lifecycle behavior (open/close balance, warm-up failure,
//! config rejection, bounded frame budgets, diagnostic failures).

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    CaptureBackend, Device, DeviceInfo, DiagnosticChannel, DiagnosticError, FirmwareUpdateChannel,
    FirmwareUpdateError, FrameInfo, FrameSet, Pipeline, PipelineError, Sensor, WaitError,
};
use crate::profile::{PixelFormat, StreamKind, StreamProfile};
use crate::resolve::ResolvedConfig;

/// Frame budget value meaning "never run out".
const UNLIMITED: u64 = u64::MAX;

struct Shared {
    has_device: bool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_warmup: AtomicBool,
    reject_config: AtomicBool,
    frame_budget: AtomicU64,
    waits_served: AtomicU64,
    diag_fail: AtomicBool,
    diag_response: Mutex<Bytes>,
    diag_requests: Mutex<Vec<Vec<u8>>>,
    flashed: Mutex<Vec<usize>>,
}

/// Scripted device context.
pub struct FakeBackend {
    shared: Arc<Shared>,
}

impl FakeBackend {
    /// Product id reported by the scripted device.
    pub const PRODUCT_ID: &'static str = "0B64";

    /// A backend with one connected device offering the full canned
    /// capability set (see [`FakeDevice`]).
    pub fn new() -> Self {
        Self::build(true)
    }

    /// A backend with no connected devices.
    pub fn without_device() -> Self {
        Self::build(false)
    }

    fn build(has_device: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                has_device,
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail_warmup: AtomicBool::new(false),
                reject_config: AtomicBool::new(false),
                frame_budget: AtomicU64::new(UNLIMITED),
                waits_served: AtomicU64::new(0),
                diag_fail: AtomicBool::new(false),
                diag_response: Mutex::new(Bytes::from_static(&[0x01, 0x00, 0xab, 0xcd])),
                diag_requests: Mutex::new(Vec::new()),
                flashed: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every frame wait time out, including the warm-up wait.
    pub fn fail_warmup(&self) {
        self.shared.fail_warmup.store(true, Ordering::SeqCst);
    }

    /// Make pipeline start refuse any configuration.
    pub fn reject_config(&self) {
        self.shared.reject_config.store(true, Ordering::SeqCst);
    }

    /// Serve exactly `n` successful frame waits (the warm-up wait counts),
    /// then time out.
    pub fn limit_framesets(&self, n: u64) {
        self.shared.frame_budget.store(n, Ordering::SeqCst);
    }

    /// Make every diagnostic exchange fail.
    pub fn fail_diagnostics(&self) {
        self.shared.diag_fail.store(true, Ordering::SeqCst);
    }

    /// Script the payload returned by diagnostic exchanges.
    pub fn set_diag_response(&self, response: Bytes) {
        *self.shared.diag_response.lock().unwrap() = response;
    }

    /// Number of pipeline handles opened so far.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of pipeline handles released so far.
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Raw requests received over the diagnostic channel.
    pub fn diag_requests(&self) -> Vec<Vec<u8>> {
        self.shared.diag_requests.lock().unwrap().clone()
    }

    /// Sizes of firmware images flashed so far.
    pub fn flashed_images(&self) -> Vec<usize> {
        self.shared.flashed.lock().unwrap().clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for FakeBackend {
    type Device = FakeDevice;
    type Pipeline = FakePipeline;

    fn devices(&self) -> Vec<FakeDevice> {
        if self.shared.has_device {
            vec![FakeDevice {
                shared: Arc::clone(&self.shared),
            }]
        } else {
            Vec::new()
        }
    }

    fn create_pipeline(&self) -> Result<FakePipeline, PipelineError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        Ok(FakePipeline {
            shared: Arc::clone(&self.shared),
            started: false,
            active: Vec::new(),
        })
    }
}

/// The scripted device.
///
/// Capability set: a stereo sensor with three depth profiles and two
/// infrared profiles (sensor index 1), a color sensor with three profiles,
/// and a motion sensor with one. Diagnostic and firmware-update channels
/// are both present.
pub struct FakeDevice {
    shared: Arc<Shared>,
}

impl Device for FakeDevice {
    type Sensor = FakeSensor;

    fn info(&self, field: DeviceInfo) -> Option<String> {
        match field {
            DeviceInfo::Name => Some("Miru Test Camera".to_string()),
            DeviceInfo::ProductId => Some(FakeBackend::PRODUCT_ID.to_string()),
            DeviceInfo::SerialNumber => Some("843112070000".to_string()),
            DeviceInfo::FirmwareVersion => Some("05.12.07.100".to_string()),
            DeviceInfo::DebugOpCode => Some("21".to_string()),
        }
    }

    fn sensors(&self) -> Vec<FakeSensor> {
        vec![
            FakeSensor {
                profiles: stereo_profiles(),
            },
            FakeSensor {
                profiles: color_profiles(),
            },
            FakeSensor {
                profiles: motion_profiles(),
            },
        ]
    }

    fn as_diagnostic(&self) -> Option<&dyn DiagnosticChannel> {
        Some(self)
    }

    fn as_firmware_update(&self) -> Option<&dyn FirmwareUpdateChannel> {
        Some(self)
    }
}

impl DiagnosticChannel for FakeDevice {
    fn send_and_receive(&self, request: &[u8]) -> Result<Bytes, DiagnosticError> {
        self.shared
            .diag_requests
            .lock()
            .unwrap()
            .push(request.to_vec());
        if self.shared.diag_fail.load(Ordering::SeqCst) {
            return Err(DiagnosticError::Io("scripted transport failure".to_string()));
        }
        Ok(self.shared.diag_response.lock().unwrap().clone())
    }
}

impl FirmwareUpdateChannel for FakeDevice {
    fn update(
        &self,
        image: &[u8],
        progress: &mut dyn FnMut(f32),
    ) -> Result<(), FirmwareUpdateError> {
        for step in 1..=4 {
            progress(step as f32 / 4.0);
        }
        self.shared.flashed.lock().unwrap().push(image.len());
        Ok(())
    }
}

pub struct FakeSensor {
    profiles: Vec<StreamProfile>,
}

impl Sensor for FakeSensor {
    fn profiles(&self) -> Vec<StreamProfile> {
        self.profiles.clone()
    }
}

pub struct FakePipeline {
    shared: Arc<Shared>,
    started: bool,
    active: Vec<StreamProfile>,
}

impl Pipeline for FakePipeline {
    type FrameSet = FakeFrameSet;

    fn start(&mut self, config: &ResolvedConfig) -> Result<(), PipelineError> {
        if self.shared.reject_config.load(Ordering::SeqCst) {
            return Err(PipelineError::Rejected(
                "scripted negotiation refusal".to_string(),
            ));
        }
        self.active = config.profiles().to_vec();
        self.started = true;
        Ok(())
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<FakeFrameSet, WaitError> {
        if !self.started {
            return Err(WaitError::Device("pipeline not started".to_string()));
        }
        if self.shared.fail_warmup.load(Ordering::SeqCst) {
            return Err(WaitError::Timeout);
        }

        let served = self.shared.waits_served.fetch_add(1, Ordering::SeqCst) + 1;
        if served > self.shared.frame_budget.load(Ordering::SeqCst) {
            return Err(WaitError::Timeout);
        }

        // Simulate frame pacing without ever exceeding the caller's timeout.
        std::thread::sleep(Duration::from_millis(5).min(timeout));

        let sources: Vec<(StreamKind, u8)> = if self.active.is_empty() {
            // Device-default streams
            vec![(StreamKind::Depth, 0), (StreamKind::Color, 0)]
        } else {
            self.active.iter().map(|p| (p.kind, p.sensor_index)).collect()
        };

        let frames = sources
            .into_iter()
            .map(|(kind, sensor_index)| FrameInfo {
                kind,
                sensor_index,
                frame_number: served,
                timestamp_us: served * 33_333,
            })
            .collect();

        Ok(FakeFrameSet { frames })
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

impl Drop for FakePipeline {
    fn drop(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeFrameSet {
    frames: Vec<FrameInfo>,
}

impl FrameSet for FakeFrameSet {
    fn frames(&self) -> Vec<FrameInfo> {
        self.frames.clone()
    }
}

fn stereo_profiles() -> Vec<StreamProfile> {
    let depth = |width, height| StreamProfile {
        kind: StreamKind::Depth,
        sensor_index: 0,
        width,
        height,
        format: PixelFormat::Z16,
        frame_rate: 30,
    };
    let infrared = |width, height| StreamProfile {
        kind: StreamKind::Infrared,
        sensor_index: 1,
        width,
        height,
        format: PixelFormat::Y8,
        frame_rate: 30,
    };
    vec![
        depth(480, 270),
        depth(640, 480),
        depth(1280, 720),
        infrared(640, 480),
        infrared(1280, 720),
    ]
}

fn color_profiles() -> Vec<StreamProfile> {
    let color = |width, height, format| StreamProfile {
        kind: StreamKind::Color,
        sensor_index: 0,
        width,
        height,
        format,
        frame_rate: 30,
    };
    vec![
        color(640, 480, PixelFormat::Yuyv),
        color(1280, 720, PixelFormat::Rgb8),
        color(1920, 1080, PixelFormat::Rgb8),
    ]
}

fn motion_profiles() -> Vec<StreamProfile> {
    vec![StreamProfile {
        kind: StreamKind::Motion,
        sensor_index: 0,
        width: 0,
        height: 0,
        format: PixelFormat::MotionXyz32f,
        frame_rate: 200,
    }]
}
