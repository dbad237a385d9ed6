//! Firmware flashing over the device's update capability.
//!
//! Validation happens here; the actual transfer mechanics live behind
//! [`FirmwareUpdateChannel`](crate::backend::FirmwareUpdateChannel).

use thiserror::Error;
use tracing::info;

use crate::backend::{Device, FirmwareUpdateError};

/// Maximum accepted firmware image size (16 MB).
pub const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("device does not expose a firmware-update channel")]
    NotSupported,
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("firmware image too large: {0} bytes (max {MAX_IMAGE_SIZE})")]
    ImageTooLarge(usize),
    #[error(transparent)]
    Update(#[from] FirmwareUpdateError),
}

/// Validate `image` and flash it, logging progress at 10% steps.
pub fn flash<D: Device>(device: &D, image: &[u8]) -> Result<(), FlashError> {
    let Some(channel) = device.as_firmware_update() else {
        return Err(FlashError::NotSupported);
    };
    if image.is_empty() {
        return Err(FlashError::EmptyImage);
    }
    if image.len() > MAX_IMAGE_SIZE {
        return Err(FlashError::ImageTooLarge(image.len()));
    }

    info!(bytes = image.len(), "starting firmware update");
    let mut last_decile = 0u8;
    channel.update(image, &mut |progress| {
        let decile = (progress.clamp(0.0, 1.0) * 10.0) as u8;
        if decile > last_decile {
            last_decile = decile;
            info!("firmware update {}%", u32::from(decile) * 10);
        }
    })?;
    info!("firmware update complete");
    Ok(())
}
