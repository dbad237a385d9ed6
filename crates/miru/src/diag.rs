//! Raw firmware-log polling over the diagnostic channel.
//!
//! The fw-log command is a fixed 24-byte raw request; only the opcode byte
//! varies per device and is read from device info at poll time. Everything
//! here is best-effort: a failed poll is logged by the caller and changes
//! nothing about streaming.

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::backend::{Device, DeviceInfo, DiagnosticError};

/// Raw command preamble: length 0x0014, magic 0xABCD (little-endian pairs).
const FW_LOG_HEADER: [u8; 4] = [0x14, 0x00, 0xab, 0xcd];

/// Number of log entries requested per poll.
const FW_LOG_ENTRIES: u16 = 500;

/// Full raw request size.
pub const FW_LOG_REQUEST_LEN: usize = 24;

/// Build the raw fw-log request for `opcode`.
pub fn fw_log_request(opcode: u8) -> [u8; FW_LOG_REQUEST_LEN] {
    let mut buf = [0u8; FW_LOG_REQUEST_LEN];
    buf[..4].copy_from_slice(&FW_LOG_HEADER);
    buf[4] = opcode;
    buf[8..10].copy_from_slice(&FW_LOG_ENTRIES.to_le_bytes());
    buf
}

#[derive(Debug, Error)]
pub enum FwLogError {
    #[error("device reports no usable fw-log opcode ('{0}')")]
    BadOpCode(String),
    #[error(transparent)]
    Channel(#[from] DiagnosticError),
}

/// One fw-log exchange. `Ok(None)` when the device exposes no diagnostic
/// channel at all.
pub fn poll_fw_logs<D: Device>(device: &D) -> Result<Option<Bytes>, FwLogError> {
    let Some(channel) = device.as_diagnostic() else {
        return Ok(None);
    };

    let opcode_str = device.info(DeviceInfo::DebugOpCode).unwrap_or_default();
    let opcode: u8 = opcode_str
        .trim()
        .parse()
        .map_err(|_| FwLogError::BadOpCode(opcode_str.clone()))?;

    let response = channel.send_and_receive(&fw_log_request(opcode))?;
    trace!(len = response.len(), "fw-log response");
    Ok(Some(response))
}

/// Space-separated hex rendering for log output.
pub fn render_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
