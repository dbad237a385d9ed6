//! Resolve persisted stream selections against device capabilities.

use thiserror::Error;
use tracing::debug;

use crate::catalog::CapabilitySnapshot;
use crate::prefs::Preferences;
use crate::profile::{SelectionKey, StreamProfile};

/// Validated list of profiles to activate, at most one per
/// (kind, sensor index) group.
///
/// Empty is a legal outcome (no stream enabled): the pipeline then starts
/// with device defaults. It is distinct from a failed resolution, which
/// never produces a config at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig {
    profiles: Vec<StreamProfile>,
}

impl ResolvedConfig {
    /// Config with no explicit streams; the device picks its defaults.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &[StreamProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A persisted index does not fit the profile list the device offers.
    /// Hard error on purpose: silently substituting a different profile
    /// than the user configured would be worse than failing the start.
    #[error("selection {key} index {chosen} out of range, device offers {available} profiles")]
    InvalidSelection {
        key: SelectionKey,
        chosen: i64,
        available: usize,
    },
}

/// Map persisted selections for `product_id` onto `snapshot`.
///
/// Groups without a persisted selection, or with one that is disabled, are
/// skipped. An out-of-range chosen index fails the whole resolution; no
/// partial config is returned.
pub fn resolve(
    snapshot: &CapabilitySnapshot,
    product_id: &str,
    prefs: &dyn Preferences,
) -> Result<ResolvedConfig, ResolveError> {
    let mut profiles = Vec::new();

    for (stream_key, group) in snapshot.groups() {
        let key = SelectionKey::new(product_id, stream_key.kind, stream_key.sensor_index);
        let selection = prefs.selection(&key);
        if !selection.enabled {
            continue;
        }

        let chosen = selection.chosen_index;
        if chosen < 0 || chosen as usize >= group.len() {
            return Err(ResolveError::InvalidSelection {
                key,
                chosen,
                available: group.len(),
            });
        }

        let profile = group[chosen as usize].clone();
        debug!(%profile, index = chosen, "selection resolved");
        profiles.push(profile);
    }

    Ok(ResolvedConfig { profiles })
}
