//! Backend configuration.
//!
//! Configuration arrives as an option map (already loaded by the caller) and
//! is merged over per-backend defaults.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::BackendKind;

/// Device path prefix key.
pub const KEY_DEV_PATH: &str = "dev-path";
/// LVM volume group / ZFS pool key.
pub const KEY_VOLUME_GROUP: &str = "volume-group";
/// Directory holding the external tool binaries.
pub const KEY_TOOL_PATH: &str = "tool-path";
/// Pool size ratio (percent of the volume size) for pool-backed backends.
pub const KEY_POOL_RATIO: &str = "pool-ratio";

/// Accepted legacy spellings of [`KEY_TOOL_PATH`].
const TOOL_PATH_ALIASES: [&str; 2] = ["lvm-path", "zfs-path"];

/// Default volume group / ZFS pool.
pub const DEFAULT_VOLUME_GROUP: &str = "drbdpool";
/// Default tool directory.
pub const DEFAULT_TOOL_PATH: &str = "/sbin";
/// Default pool size ratio in percent.
pub const DEFAULT_POOL_RATIO: u32 = 135;

/// Configuration of one backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Device node prefix, e.g. `/dev/` or `/dev/zvol/`
    pub dev_path: String,
    /// LVM volume group or ZFS pool holding the volumes
    pub volume_group: String,
    /// Directory containing `lvcreate`, `lvs`, `zfs`, ...
    pub tool_path: String,
    /// Pool size as a percentage of the requested volume size
    pub pool_ratio: u32,
}

impl BackendConfig {
    /// Defaults for a backend kind.
    pub fn defaults(kind: BackendKind) -> Self {
        let dev_path = if kind.is_zfs() { "/dev/zvol/" } else { "/dev/" };
        Self {
            dev_path: dev_path.to_string(),
            volume_group: DEFAULT_VOLUME_GROUP.to_string(),
            tool_path: DEFAULT_TOOL_PATH.to_string(),
            pool_ratio: DEFAULT_POOL_RATIO,
        }
    }
    
    /// Merge an option map over the defaults for `kind`.
    ///
    /// Unknown keys are ignored. An unusable pool ratio falls back to
    /// [`DEFAULT_POOL_RATIO`].
    pub fn from_options(kind: BackendKind, options: &HashMap<String, String>) -> Self {
        let mut config = Self::defaults(kind);
        
        for (key, value) in options {
            match key.as_str() {
                KEY_DEV_PATH => config.dev_path = value.clone(),
                KEY_VOLUME_GROUP => config.volume_group = value.clone(),
                KEY_TOOL_PATH => config.tool_path = value.clone(),
                k if TOOL_PATH_ALIASES.contains(&k) => {
                    // the canonical key wins over a legacy alias
                    if !options.contains_key(KEY_TOOL_PATH) {
                        config.tool_path = value.clone();
                    }
                }
                KEY_POOL_RATIO => config.pool_ratio = parse_pool_ratio(value),
                other => debug!(backend = %kind, key = %other, "Ignoring unknown option"),
            }
        }
        
        config
    }
    
    /// Builder-style volume group override.
    pub fn with_volume_group(mut self, volume_group: impl Into<String>) -> Self {
        self.volume_group = volume_group.into();
        self
    }
    
    /// Builder-style pool ratio override.
    pub fn with_pool_ratio(mut self, ratio: u32) -> Self {
        self.pool_ratio = if ratio == 0 { DEFAULT_POOL_RATIO } else { ratio };
        self
    }
    
    /// Full path of an external binary.
    pub fn tool(&self, binary: &str) -> String {
        if self.tool_path.is_empty() {
            return binary.to_string();
        }
        format!("{}/{}", self.tool_path.trim_end_matches('/'), binary)
    }
    
    /// Device node path of a volume.
    pub fn device_path(&self, volume: &str) -> String {
        let prefix = if self.dev_path.ends_with('/') {
            self.dev_path.clone()
        } else {
            format!("{}/", self.dev_path)
        };
        format!("{}{}/{}", prefix, self.volume_group, volume)
    }
    
    /// Size of a pool hosting a volume of `volume_kib`.
    pub fn pool_size_for(&self, volume_kib: u64) -> u64 {
        pool_size(volume_kib, self.pool_ratio)
    }
}

/// `ceil(volume_kib * ratio / 100)` without going through floating point.
pub fn pool_size(volume_kib: u64, ratio: u32) -> u64 {
    let scaled = volume_kib as u128 * ratio as u128;
    let size = (scaled + 99) / 100;
    u64::try_from(size).unwrap_or(u64::MAX)
}

/// Parse a configured pool ratio; `<= 0` or garbage yields the default.
pub fn parse_pool_ratio(raw: &str) -> u32 {
    let trimmed = raw.trim();
    // accept "150" as well as "150.0"
    let integral = trimmed.split('.').next().unwrap_or_default();
    match integral.parse::<i64>() {
        Ok(value) if value > 0 && value <= u32::MAX as i64 => value as u32,
        Ok(value) => {
            warn!(value, default = DEFAULT_POOL_RATIO, "Pool ratio must be positive, using default");
            DEFAULT_POOL_RATIO
        }
        Err(_) => {
            warn!(raw = %raw, default = DEFAULT_POOL_RATIO, "Unparsable pool ratio, using default");
            DEFAULT_POOL_RATIO
        }
    }
}
