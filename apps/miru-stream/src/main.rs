//! Miru headless streamer
//!
//! Runs the streaming coordinator against the scripted test source and
//! logs frameset statistics. Useful for exercising the full lifecycle
//! without hardware; real deployments link a hardware backend instead.
//!
//! ## Usage
//!
//! ```bash
//! # Stream from the test source until Ctrl-C
//! miru-stream --test-source
//!
//! # Persist stream selections to a TOML file
//! MIRU_PREFS=/var/lib/miru/settings.toml miru-stream --test-source
//!
//! # Tune loop cadences
//! MIRU_FRAME_TIMEOUT_MS=500 MIRU_FWLOG_INTERVAL_MS=1000 miru-stream --test-source
//!
//! # Skip persisted selections and stream device defaults
//! MIRU_LOAD_SELECTIONS=0 miru-stream --test-source
//! ```

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use miru::backend::fake::{FakeBackend, FakeFrameSet};
use miru::backend::FrameSet;
use miru::diag;
use miru::prefs::{FilePrefs, MemoryPrefs, Preferences, StreamSelection};
use miru::{
    AcquireError, ResolvedConfig, SelectionKey, StreamKind, StreamListener, Streamer,
    StreamerConfig,
};

/// Streamer configuration from environment/args
struct Config {
    frame_timeout: Duration,
    fw_log_interval: Duration,
    load_selections: bool,
    prefs_path: Option<String>,
    test_source: bool,
}

impl Config {
    fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let test_source = args.iter().any(|arg| arg == "--test-source");

        let frame_timeout = env_ms("MIRU_FRAME_TIMEOUT_MS", 1000);
        let fw_log_interval = env_ms("MIRU_FWLOG_INTERVAL_MS", 500);

        let load_selections = std::env::var("MIRU_LOAD_SELECTIONS")
            .map(|v| v != "0")
            .unwrap_or(true);

        let prefs_path = std::env::var("MIRU_PREFS").ok();

        Self {
            frame_timeout,
            fw_log_interval,
            load_selections,
            prefs_path,
            test_source,
        }
    }
}

fn env_ms(name: &str, default: u64) -> Duration {
    let ms = std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

/// Logs frameset throughput and diagnostic payloads.
#[derive(Default)]
struct StatsListener {
    framesets: AtomicU64,
}

impl StreamListener<FakeFrameSet> for StatsListener {
    fn on_configured(&self, config: &ResolvedConfig) {
        if config.is_empty() {
            info!("no streams selected, using device defaults");
        }
        for profile in config.profiles() {
            info!("  stream: {profile}");
        }
    }

    fn on_frameset(&self, frames: &FakeFrameSet) {
        let count = self.framesets.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 30 == 0 {
            let infos = frames.frames();
            let number = infos.first().map(|f| f.frame_number).unwrap_or(0);
            info!(
                "frameset #{count}: {} frames, device frame {number}",
                infos.len()
            );
        }
    }

    fn on_diagnostic(&self, bytes: &[u8]) {
        debug!("fw_log: {}", diag::render_hex(bytes));
    }

    fn on_acquisition_stopped(&self, reason: &AcquireError) {
        error!("acquisition stopped: {reason}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("miru=info".parse().unwrap())
                .add_directive("miru_stream=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env();
    if !config.test_source {
        bail!("no hardware backend is linked into this binary; run with --test-source");
    }

    info!("Miru streamer starting");
    info!("  Frame timeout: {:?}", config.frame_timeout);
    info!("  Fw-log interval: {:?}", config.fw_log_interval);
    info!("  Load selections: {}", config.load_selections);

    let prefs: Arc<dyn Preferences> = match &config.prefs_path {
        Some(path) => {
            info!("  Selections: {path}");
            Arc::new(FilePrefs::load(path).context("Failed to load preferences file")?)
        }
        None => {
            // Ephemeral defaults: depth + color at their middle profiles.
            let prefs = MemoryPrefs::new();
            for kind in [StreamKind::Depth, StreamKind::Color] {
                prefs.set_selection(
                    &SelectionKey::new(FakeBackend::PRODUCT_ID, kind, 0),
                    StreamSelection {
                        enabled: true,
                        chosen_index: 1,
                    },
                );
            }
            Arc::new(prefs)
        }
    };

    let backend = Arc::new(FakeBackend::new());
    let listener = Arc::new(StatsListener::default());
    let streamer = Streamer::with_config(
        backend,
        prefs,
        listener.clone() as Arc<dyn StreamListener<FakeFrameSet>>,
        StreamerConfig {
            frame_timeout: config.frame_timeout,
            fw_log_interval: config.fw_log_interval,
            load_selections: config.load_selections,
        },
    );

    streamer.start().await.context("Failed to start streaming")?;
    info!("streaming, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    streamer.stop().await;

    let total = listener.framesets.load(Ordering::Relaxed);
    info!("delivered {total} framesets");
    Ok(())
}
