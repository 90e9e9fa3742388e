//! Backend type definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Kind of volume backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Plain LVM logical volumes
    Lvm,
    /// LVM thin volumes, one thin pool per volume
    ThinLv,
    /// ZFS volumes
    Zvol,
    /// Sparse ZFS volumes
    ThinZvol,
}

impl BackendKind {
    /// All known backend kinds.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Lvm,
        BackendKind::ThinLv,
        BackendKind::Zvol,
        BackendKind::ThinZvol,
    ];
    
    /// Short lowercase name used in logs, config and state file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Lvm => "lvm",
            BackendKind::ThinLv => "thinlv",
            BackendKind::Zvol => "zvol",
            BackendKind::ThinZvol => "thinzvol",
        }
    }
    
    /// Whether this kind drives the ZFS tool family.
    pub fn is_zfs(&self) -> bool {
        matches!(self, BackendKind::Zvol | BackendKind::ThinZvol)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;
    
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lvm" => Ok(BackendKind::Lvm),
            "thinlv" | "lvm-thinlv" => Ok(BackendKind::ThinLv),
            "zvol" => Ok(BackendKind::Zvol),
            "thinzvol" | "zvol-thin" => Ok(BackendKind::ThinZvol),
            other => Err(BackendError::InvalidConfig(format!("unknown backend kind: {}", other))),
        }
    }
}

/// One managed backing volume.
///
/// The name never changes after creation and the path is derived from the
/// configured device path prefix, volume group and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    name: String,
    path: String,
    size_kib: u64,
}

impl BlockDevice {
    /// Create a block device descriptor.
    pub fn new(name: impl Into<String>, size_kib: u64, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size_kib,
        }
    }
    
    /// Volume name, unique within a backend.
    pub fn name(&self) -> &str {
        &self.name
    }
    
    /// Declared size in binary kilobytes.
    pub fn size_kib(&self) -> u64 {
        self.size_kib
    }
    
    /// Device node path.
    pub fn path(&self) -> &str {
        &self.path
    }
    
    pub(crate) fn set_size_kib(&mut self, size_kib: u64) {
        self.size_kib = size_kib;
    }
}

/// An intermediate allocation unit hosting zero or more volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    members: BTreeSet<String>,
    name: String,
    size_kib: u64,
}

impl Pool {
    /// Create an empty pool record.
    pub fn new(name: impl Into<String>, size_kib: u64) -> Self {
        Self {
            members: BTreeSet::new(),
            name: name.into(),
            size_kib,
        }
    }
    
    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }
    
    /// Pool size in binary kilobytes.
    pub fn size_kib(&self) -> u64 {
        self.size_kib
    }
    
    /// Names of the volumes hosted by this pool.
    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }
    
    /// Whether the pool hosts no volumes and may be removed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
    
    pub(crate) fn set_size_kib(&mut self, size_kib: u64) {
        self.size_kib = size_kib;
    }
    
    pub(crate) fn members_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.members
    }
}

/// Coarse outcome reported to the orchestrator.
///
/// Root causes are only available in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Success,
    StorageError,
}

impl OpStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, OpStatus::Success)
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpStatus::Success => write!(f, "success"),
            OpStatus::StorageError => write!(f, "storage error"),
        }
    }
}

impl<T> From<&crate::error::Result<T>> for OpStatus {
    fn from(result: &crate::error::Result<T>) -> Self {
        if result.is_ok() {
            OpStatus::Success
        } else {
            OpStatus::StorageError
        }
    }
}

/// Result of a pool capacity query.
///
/// Both values are zero unless `status` is [`OpStatus::Success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub status: OpStatus,
    pub total_kib: u64,
    pub free_kib: u64,
}

impl CapacityReport {
    pub fn failed() -> Self {
        Self {
            status: OpStatus::StorageError,
            total_kib: 0,
            free_kib: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("lvm".parse::<BackendKind>().unwrap(), BackendKind::Lvm);
        assert_eq!("ThinLv".parse::<BackendKind>().unwrap(), BackendKind::ThinLv);
        assert_eq!("zvol-thin".parse::<BackendKind>().unwrap(), BackendKind::ThinZvol);
        assert!("btrfs".parse::<BackendKind>().is_err());
        
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
    }
    
    #[test]
    fn test_block_device_serializes_with_sorted_keys() {
        let dev = BlockDevice::new("res1_00", 4096, "/dev/drbdpool/res1_00");
        let json = serde_json::to_string(&dev).unwrap();
        assert_eq!(
            json,
            r#"{"name":"res1_00","path":"/dev/drbdpool/res1_00","size_kib":4096}"#
        );
    }
    
    #[test]
    fn test_status_from_result() {
        let ok: crate::error::Result<()> = Ok(());
        let err: crate::error::Result<()> = Err(BackendError::OperationFailed("x".into()));
        assert_eq!(OpStatus::from(&ok), OpStatus::Success);
        assert_eq!(OpStatus::from(&err), OpStatus::StorageError);
    }
}
