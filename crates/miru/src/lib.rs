//! Miru — synchronized multi-sensor frame streaming for depth cameras.
//!
//! Coordinates when a device's capture pipeline is started, polled, and
//! stopped, and resolves which streams to run from persisted user
//! selections reconciled against the device's actual capability set.
//!
//! - **`backend`**: traits wrapping the hardware stack (device context,
//!   devices, sensors, blocking pipeline) plus a scripted fake behind the
//!   `test-source` feature
//! - **`catalog`**: per-device capability snapshot, grouped by
//!   (kind, sensor index)
//! - **`prefs`**: persisted stream selections (in-memory and TOML file)
//! - **`resolve`**: selections × capabilities → validated config
//! - **`session`**: exclusive owner of one pipeline handle, with the
//!   `Closed → Starting → Open → Stopping → Closed` state machine
//! - **`stream`**: the coordinator — start/stop lifecycle, self-reposting
//!   acquisition loop, best-effort fw-log loop
//! - **`diag`** / **`fwupdate`**: raw fw-log polling and firmware flashing
//!   over the device's optional capability channels

pub mod backend;
pub mod catalog;
pub mod diag;
pub mod fwupdate;
pub mod prefs;
pub mod profile;
pub mod resolve;
pub mod session;
pub mod stream;

pub use catalog::CapabilitySnapshot;
pub use prefs::{FilePrefs, MemoryPrefs, Preferences, StreamSelection};
pub use profile::{PixelFormat, SelectionKey, StreamKey, StreamKind, StreamProfile};
pub use resolve::{resolve, ResolveError, ResolvedConfig};
pub use session::{AcquireError, SessionError, SessionState, StreamSession};
pub use stream::{StartError, StreamListener, Streamer, StreamerConfig};
