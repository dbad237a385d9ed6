//! Stream profile and selection key types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of data a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Z-distance per pixel
    Depth,
    /// RGB imagery
    Color,
    /// IR imagery (stereo devices expose more than one)
    Infrared,
    /// IMU samples (gyro/accel)
    Motion,
}

impl StreamKind {
    /// Stable lowercase name, used in persisted selection keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Depth => "depth",
            StreamKind::Color => "color",
            StreamKind::Infrared => "infrared",
            StreamKind::Motion => "motion",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "depth" => Ok(StreamKind::Depth),
            "color" => Ok(StreamKind::Color),
            "infrared" => Ok(StreamKind::Infrared),
            "motion" => Ok(StreamKind::Motion),
            other => Err(KeyParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Pixel layout of a stream's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 16-bit depth in millimeters
    Z16,
    /// 8-bit RGB triplets
    Rgb8,
    /// YUYV 4:2:2
    Yuyv,
    /// 8-bit grayscale (infrared)
    Y8,
    /// 3x f32 motion vector
    MotionXyz32f,
}

/// Identifies one stream endpoint on a device: what kind of data, from
/// which sensor. Capability groups and persisted selections are both
/// keyed by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub kind: StreamKind,
    pub sensor_index: u8,
}

impl StreamKey {
    pub fn new(kind: StreamKind, sensor_index: u8) -> Self {
        Self { kind, sensor_index }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.sensor_index)
    }
}

/// A concrete capability offered by a sensor.
///
/// Profiles are produced only by the capability catalog from a live
/// device, never constructed speculatively: a profile in hand always
/// describes something the connected device actually offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub kind: StreamKind,
    pub sensor_index: u8,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_rate: u32,
}

impl StreamProfile {
    /// The (kind, sensor index) group this profile belongs to.
    pub fn key(&self) -> StreamKey {
        StreamKey::new(self.kind, self.sensor_index)
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} {:?} @{}fps",
            self.key(),
            self.width,
            self.height,
            self.format,
            self.frame_rate
        )
    }
}

/// Namespaces one persisted stream selection by (device product id,
/// stream kind, sensor index).
///
/// The selection stored under this key holds an ordinal index into the
/// catalog's ordered profile list for the group. That ordering is not
/// guaranteed stable across firmware/driver revisions, so a persisted
/// index may resolve to a different profile (or fail range validation)
/// after a firmware update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    pub product_id: String,
    pub kind: StreamKind,
    pub sensor_index: u8,
}

impl SelectionKey {
    pub fn new(product_id: impl Into<String>, kind: StreamKind, sensor_index: u8) -> Self {
        Self {
            product_id: product_id.into(),
            kind,
            sensor_index,
        }
    }

    /// Preference key for the enabled flag.
    pub fn enabled_key(&self) -> String {
        format!("{self}:enabled")
    }

    /// Preference key for the chosen profile index.
    pub fn index_key(&self) -> String {
        format!("{self}:index")
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.product_id, self.kind, self.sensor_index)
    }
}

impl FromStr for SelectionKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Parse from the right: the product id may itself contain ':'.
        let mut parts = s.rsplitn(3, ':');
        let index = parts.next().ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;
        let kind = parts.next().ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;
        let product_id = parts.next().ok_or_else(|| KeyParseError::Malformed(s.to_string()))?;

        let sensor_index = index
            .parse::<u8>()
            .map_err(|_| KeyParseError::Malformed(s.to_string()))?;

        Ok(Self {
            product_id: product_id.to_string(),
            kind: kind.parse()?,
            sensor_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("unknown stream kind '{0}'")]
    UnknownKind(String),
    #[error("malformed selection key '{0}'")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_round_trips() {
        for kind in [
            StreamKind::Depth,
            StreamKind::Color,
            StreamKind::Infrared,
            StreamKind::Motion,
        ] {
            assert_eq!(kind.as_str().parse::<StreamKind>(), Ok(kind));
        }
    }

    #[test]
    fn selection_key_round_trips() {
        let key = SelectionKey::new("0B64", StreamKind::Infrared, 2);
        let parsed: SelectionKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn selection_key_tolerates_colons_in_product_id() {
        let key = SelectionKey::new("usb:0B64", StreamKind::Depth, 0);
        let parsed: SelectionKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn derived_preference_keys_are_distinct() {
        let key = SelectionKey::new("0B64", StreamKind::Color, 0);
        assert_eq!(key.enabled_key(), "0B64:color:0:enabled");
        assert_eq!(key.index_key(), "0B64:color:0:index");
        assert_ne!(key.enabled_key(), key.index_key());
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!("".parse::<SelectionKey>().is_err());
        assert!("0B64:color".parse::<SelectionKey>().is_err());
        assert!("0B64:sonar:0".parse::<SelectionKey>().is_err());
        assert!("0B64:color:many".parse::<SelectionKey>().is_err());
    }

    #[test]
    fn profile_key_matches_fields() {
        let profile = StreamProfile {
            kind: StreamKind::Depth,
            sensor_index: 0,
            width: 640,
            height: 480,
            format: PixelFormat::Z16,
            frame_rate: 30,
        };
        assert_eq!(profile.key(), StreamKey::new(StreamKind::Depth, 0));
    }
}
