//! Backend variants.
//!
//! Each variant only knows how to build and interpret its tool's commands.
//! Retries, inventory bookkeeping, persistence and rollback live in
//! [`Backend`](crate::backend::Backend), which drives any [`VolumeDriver`].
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │       Backend        │
//!                 │ retry / rollback /   │
//!                 │ inventory / persist  │
//!                 └──────────┬───────────┘
//!        ┌───────────┬───────┴───┬────────────┐
//!        ▼           ▼           ▼            ▼
//!   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐
//!   │   Lvm   │ │ ThinLv  │ │  Zvol   │ │ ThinZvol │
//!   │         │ │ + pools │ │  (CoW)  │ │  (CoW)   │
//!   └─────────┘ └─────────┘ └─────────┘ └──────────┘
//! ```

mod lvm;
mod zfs;

pub use lvm::{LvmDriver, ThinLvDriver, LVM_NOT_FOUND_STATUS};
pub use zfs::{ZvolDriver, ZFS_NOT_FOUND_STATUS};

use std::path::PathBuf;

use crate::command::Tool;
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::types::{BackendKind, BlockDevice};

/// Directory holding the per-backend state files.
pub const STATE_DIR: &str = "/var/lib/blockstore";

/// Tool-specific half of a backend.
pub trait VolumeDriver: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> BackendKind;
    
    /// Active configuration.
    fn config(&self) -> &BackendConfig;
    
    /// Replace the configuration.
    fn set_config(&mut self, config: BackendConfig);
    
    /// Fixed location of this variant's state file.
    fn default_state_file(&self) -> PathBuf {
        PathBuf::from(STATE_DIR).join(format!("blockstore-{}.local.json", self.kind()))
    }
    
    /// Device node of a volume.
    fn device_path(&self, name: &str) -> String {
        self.config().device_path(name)
    }
    
    /// Whether the named volume exists on the system.
    fn volume_exists(&self, tool: &Tool, name: &str) -> Result<bool>;
    
    /// Create a volume, inside `pool` for pool-backed variants.
    fn create_volume(&self, tool: &Tool, name: &str, size_kib: u64, pool: Option<&str>) -> Result<()>;
    
    /// Remove a volume.
    fn remove_volume(&self, tool: &Tool, name: &str) -> Result<()>;
    
    /// Grow a volume to `size_kib`.
    fn extend_volume(&self, tool: &Tool, name: &str, size_kib: u64) -> Result<()>;
    
    /// Create `snapshot` as a snapshot volume of `source`.
    fn create_snapshot(&self, tool: &Tool, source: &BlockDevice, snapshot: &str) -> Result<()>;
    
    /// Create `target` from the snapshot volume `snapshot`.
    fn restore_snapshot(&self, tool: &Tool, snapshot: &BlockDevice, target: &str) -> Result<()> {
        self.create_snapshot(tool, snapshot, target)
    }
    
    /// Whether restored volumes come up without a known size and must settle first.
    fn restore_needs_settle(&self) -> bool {
        false
    }
    
    /// Ask the tool for a volume's current size.
    fn query_volume_size(&self, _tool: &Tool, name: &str) -> Result<u64> {
        Err(BackendError::OperationFailed(format!(
            "{} backend cannot query the size of {}",
            self.kind(),
            name
        )))
    }
    
    /// `(total_kib, free_kib)` of the volume group / ZFS pool.
    fn pool_capacity(&self, tool: &Tool) -> Result<(u64, u64)>;
    
    /// Make a volume's device node available.
    fn activate(&self, _tool: &Tool, _name: &str) -> Result<()> {
        Ok(())
    }
    
    /// Take a volume's device node away.
    fn deactivate(&self, _tool: &Tool, _name: &str) -> Result<()> {
        Ok(())
    }
    
    /// Pool operations, for variants that place volumes inside pools.
    fn pools(&self) -> Option<&dyn PoolDriver> {
        None
    }
}

/// Pool lifecycle of pool-backed variants.
pub trait PoolDriver: Send + Sync {
    fn pool_exists(&self, tool: &Tool, pool: &str) -> Result<bool>;
    fn create_pool(&self, tool: &Tool, pool: &str, size_kib: u64) -> Result<()>;
    fn remove_pool(&self, tool: &Tool, pool: &str) -> Result<()>;
    fn extend_pool(&self, tool: &Tool, pool: &str, size_kib: u64) -> Result<()>;
}

/// Build the driver for a backend kind.
pub fn driver_for(kind: BackendKind, config: BackendConfig) -> Box<dyn VolumeDriver> {
    match kind {
        BackendKind::Lvm => Box::new(LvmDriver::new(config)),
        BackendKind::ThinLv => Box::new(ThinLvDriver::new(config)),
        BackendKind::Zvol => Box::new(ZvolDriver::new(config)),
        BackendKind::ThinZvol => Box::new(ZvolDriver::sparse(config)),
    }
}
