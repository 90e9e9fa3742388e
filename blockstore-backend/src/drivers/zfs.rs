//! ZFS volume variants.
//!
//! Snapshots are copy-on-write: a ZFS snapshot of the origin plus a writable
//! clone carrying the snapshot volume's name. Restoring clones the origin
//! snapshot of such a clone again; the new zvol's device node shows up
//! asynchronously, so restored volumes have to settle before their size is
//! known.
//!
//! Removing a clone also destroys its origin snapshot once no other clone
//! depends on it, so the snapshot name can be used again.

use tracing::{debug, info, instrument, warn};

use crate::command::{argv, Tool};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::probe::{parse_numeric_fields, probe_capacity, probe_exists};
use crate::types::{BackendKind, BlockDevice};

use super::VolumeDriver;

/// Exit code of `zfs list` for a dataset that does not exist.
pub const ZFS_NOT_FOUND_STATUS: i32 = 1;

/// ZFS volumes, optionally sparse.
#[derive(Debug, Clone)]
pub struct ZvolDriver {
    config: BackendConfig,
    sparse: bool,
}

impl ZvolDriver {
    /// Fully reserved zvols.
    pub fn new(config: BackendConfig) -> Self {
        Self { config, sparse: false }
    }
    
    /// Sparse (thin) zvols.
    pub fn sparse(config: BackendConfig) -> Self {
        Self { config, sparse: true }
    }
    
    fn zfs(&self) -> String {
        self.config.tool("zfs")
    }
    
    /// `POOL/NAME`
    fn dataset(&self, name: &str) -> String {
        format!("{}/{}", self.config.volume_group, name)
    }
    
    /// `POOL/SOURCE@SNAPSHOT`
    fn snapshot_of(&self, source: &str, snapshot: &str) -> String {
        format!("{}@{}", self.dataset(source), snapshot)
    }
    
    /// Origin snapshot of a clone, `None` for datasets that are not clones.
    fn origin(&self, tool: &Tool, name: &str) -> Result<Option<String>> {
        let output = tool.exec_checked(&argv([
            self.zfs(),
            "get".into(),
            "-H".into(),
            "-o".into(),
            "value".into(),
            "origin".into(),
            self.dataset(name),
        ]))?;
        
        Ok(output
            .first_line()
            .filter(|line| !line.is_empty() && *line != "-")
            .map(str::to_string))
    }
    
    /// Clones still depending on the ZFS snapshot `origin`.
    fn clones_of(&self, tool: &Tool, origin: &str) -> Result<Vec<String>> {
        let output = tool.exec_checked(&argv([
            self.zfs(),
            "get".into(),
            "-H".into(),
            "-o".into(),
            "value".into(),
            "clones".into(),
            origin.to_string(),
        ]))?;

        Ok(output
            .first_line()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|clone| !clone.is_empty() && *clone != "-")
            .map(str::to_string)
            .collect())
    }

    /// Destroy the ZFS snapshot `origin` unless a clone still uses it.
    fn release_origin(&self, tool: &Tool, origin: &str) {
        match self.clones_of(tool, origin) {
            Ok(clones) if clones.is_empty() => {
                match tool.exec_checked(&argv([self.zfs(), "destroy".into(), origin.to_string()])) {
                    Ok(_) => info!(origin = %origin, "Origin snapshot destroyed"),
                    Err(e) => warn!(origin = %origin, error = %e, "Failed to destroy origin snapshot"),
                }
            }
            Ok(clones) => {
                info!(origin = %origin, clones = ?clones, "Origin snapshot still has clones, keeping it");
            }
            Err(e) => warn!(origin = %origin, error = %e, "Could not list clones of origin snapshot"),
        }
    }

    fn clone_from(&self, tool: &Tool, origin: &str, target: &str) -> Result<()> {
        tool.exec_checked(&argv([self.zfs(), "clone".into(), origin.to_string(), self.dataset(target)]))?;
        Ok(())
    }
}

impl VolumeDriver for ZvolDriver {
    fn kind(&self) -> BackendKind {
        if self.sparse {
            BackendKind::ThinZvol
        } else {
            BackendKind::Zvol
        }
    }
    
    fn config(&self) -> &BackendConfig {
        &self.config
    }
    
    fn set_config(&mut self, config: BackendConfig) {
        self.config = config;
    }
    
    fn volume_exists(&self, tool: &Tool, name: &str) -> Result<bool> {
        let dataset = self.dataset(name);
        let cmd = argv([
            self.zfs(),
            "list".into(),
            "-H".into(),
            "-o".into(),
            "name".into(),
            dataset.clone(),
        ]);
        probe_exists(tool, &cmd, &dataset, ZFS_NOT_FOUND_STATUS)
    }
    
    #[instrument(skip(self, tool), fields(backend = %self.kind()))]
    fn create_volume(&self, tool: &Tool, name: &str, size_kib: u64, pool: Option<&str>) -> Result<()> {
        if let Some(pool) = pool {
            warn!(pool = %pool, "ZFS volumes do not use pools, ignoring");
        }
        
        let mut cmd = vec![self.zfs(), "create".to_string()];
        if self.sparse {
            cmd.push("-s".to_string());
        }
        cmd.extend(argv(["-V".to_string(), format!("{}k", size_kib), self.dataset(name)]));
        tool.exec_checked(&cmd)?;
        
        info!("ZFS volume created");
        Ok(())
    }
    
    /// `zfs destroy -r`, then release the clone's origin snapshot.
    fn remove_volume(&self, tool: &Tool, name: &str) -> Result<()> {
        let origin = match self.origin(tool, name) {
            Ok(origin) => origin,
            Err(e) if e.is_abort() => return Err(e),
            Err(e) => {
                debug!(error = %e, "Could not read origin, destroying anyway");
                None
            }
        };
        tool.exec_checked(&argv([self.zfs(), "destroy".into(), "-r".into(), self.dataset(name)]))?;

        if let Some(origin) = origin {
            self.release_origin(tool, &origin);
        }
        Ok(())
    }
    
    fn extend_volume(&self, tool: &Tool, name: &str, size_kib: u64) -> Result<()> {
        tool.exec_checked(&argv([
            self.zfs(),
            "set".into(),
            format!("volsize={}k", size_kib),
            self.dataset(name),
        ]))?;
        Ok(())
    }
    
    /// `zfs snapshot` of the source followed by a clone named after the snapshot.
    #[instrument(skip(self, tool, source), fields(backend = %self.kind(), source = %source.name()))]
    fn create_snapshot(&self, tool: &Tool, source: &BlockDevice, snapshot: &str) -> Result<()> {
        let origin = self.snapshot_of(source.name(), snapshot);
        tool.exec_checked(&argv([self.zfs(), "snapshot".into(), origin.clone()]))?;
        
        if let Err(e) = self.clone_from(tool, &origin, snapshot) {
            // do not leave the bare ZFS snapshot behind
            let cleanup = tool.exec_checked(&argv([self.zfs(), "destroy".into(), origin.clone()]));
            if let Err(cleanup_err) = cleanup {
                warn!(origin = %origin, error = %cleanup_err, "Failed to remove snapshot after clone failure");
            }
            return Err(e);
        }
        
        info!("ZFS snapshot clone created");
        Ok(())
    }
    
    /// Clone the origin snapshot of `snapshot` into `target`.
    #[instrument(skip(self, tool, snapshot), fields(backend = %self.kind(), snapshot = %snapshot.name()))]
    fn restore_snapshot(&self, tool: &Tool, snapshot: &BlockDevice, target: &str) -> Result<()> {
        match self.origin(tool, snapshot.name())? {
            Some(origin) => {
                self.clone_from(tool, &origin, target)?;
                info!(origin = %origin, "ZFS volume restored from snapshot");
                Ok(())
            }
            None => {
                warn!("Snapshot volume is not a clone, snapshotting it instead");
                self.create_snapshot(tool, snapshot, target)
            }
        }
    }
    
    fn restore_needs_settle(&self) -> bool {
        true
    }
    
    fn query_volume_size(&self, tool: &Tool, name: &str) -> Result<u64> {
        let output = tool.exec_checked(&argv([
            self.zfs(),
            "get".into(),
            "-Hp".into(),
            "-o".into(),
            "value".into(),
            "volsize".into(),
            self.dataset(name),
        ]))?;
        
        let line = output.first_line().unwrap_or_default();
        match parse_numeric_fields(line).as_deref() {
            Some([bytes]) => Ok(bytes / 1024),
            _ => Err(BackendError::CheckFailed(format!("unparsable volsize of {}: {:?}", name, line))),
        }
    }
    
    /// `zfs list` reports bytes; total is used + available.
    fn pool_capacity(&self, tool: &Tool) -> Result<(u64, u64)> {
        let cmd = argv([
            self.zfs(),
            "list".into(),
            "-Hp".into(),
            "-o".into(),
            "used,avail".into(),
            self.config.volume_group.clone(),
        ]);
        probe_capacity(tool, &cmd, |fields| match fields {
            [used, avail] => Some((used.checked_add(*avail)? / 1024, avail / 1024)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTool;
    use std::sync::Arc;
    
    fn setup(sparse: bool) -> (Arc<MockTool>, Tool, ZvolDriver) {
        let mock = Arc::new(MockTool::new());
        let config = BackendConfig::defaults(BackendKind::Zvol).with_volume_group("tank");
        let driver = if sparse { ZvolDriver::sparse(config) } else { ZvolDriver::new(config) };
        let tool = Tool::new(mock.clone(), driver.kind());
        (mock, tool, driver)
    }
    
    #[test]
    fn test_sparse_create_argv() {
        let (mock, tool, driver) = setup(true);
        driver.create_volume(&tool, "res1_00", 2048, None).unwrap();
        assert_eq!(mock.calls()[0], vec!["/sbin/zfs", "create", "-s", "-V", "2048k", "tank/res1_00"]);
        assert!(driver.volume_exists(&tool, "res1_00").unwrap());
    }
    
    #[test]
    fn test_snapshot_is_snapshot_plus_clone() {
        let (mock, tool, driver) = setup(false);
        driver.create_volume(&tool, "res1_00", 2048, None).unwrap();
        let source = BlockDevice::new("res1_00", 2048, "/dev/zvol/tank/res1_00");
        driver.create_snapshot(&tool, &source, "res1.s1_00").unwrap();
        
        let calls = mock.calls();
        assert_eq!(calls[1], vec!["/sbin/zfs", "snapshot", "tank/res1_00@res1.s1_00"]);
        assert_eq!(calls[2], vec!["/sbin/zfs", "clone", "tank/res1_00@res1.s1_00", "tank/res1.s1_00"]);
        assert!(driver.volume_exists(&tool, "res1.s1_00").unwrap());
    }
    
    #[test]
    fn test_restore_clones_origin_snapshot() {
        let (mock, tool, driver) = setup(false);
        driver.create_volume(&tool, "res1_00", 2048, None).unwrap();
        let source = BlockDevice::new("res1_00", 2048, "/dev/zvol/tank/res1_00");
        driver.create_snapshot(&tool, &source, "res1.s1_00").unwrap();
        
        let snap = BlockDevice::new("res1.s1_00", 2048, "/dev/zvol/tank/res1.s1_00");
        driver.restore_snapshot(&tool, &snap, "res2_00").unwrap();
        
        assert_eq!(
            mock.calls().last().unwrap(),
            &vec!["/sbin/zfs", "clone", "tank/res1_00@res1.s1_00", "tank/res2_00"]
        );
        assert_eq!(driver.query_volume_size(&tool, "res2_00").unwrap(), 2048);
    }
    
    #[test]
    fn test_capacity_from_bytes() {
        let (mock, tool, driver) = setup(false);
        mock.set_capacity_output("1048576\t3145728\n");
        assert_eq!(driver.pool_capacity(&tool).unwrap(), (4096, 3072));
    }

    #[test]
    fn test_origin_released_with_last_clone() {
        let (mock, tool, driver) = setup(false);
        driver.create_volume(&tool, "res1_00", 2048, None).unwrap();
        let source = BlockDevice::new("res1_00", 2048, "/dev/zvol/tank/res1_00");
        driver.create_snapshot(&tool, &source, "res1.s1_00").unwrap();
        let snap = BlockDevice::new("res1.s1_00", 2048, "/dev/zvol/tank/res1.s1_00");
        driver.restore_snapshot(&tool, &snap, "res2_00").unwrap();

        driver.remove_volume(&tool, "res1.s1_00").unwrap();
        assert!(mock.exists("tank/res1_00@res1.s1_00"));
        assert_eq!(mock.count_calls("zfs destroy"), 1);

        driver.remove_volume(&tool, "res2_00").unwrap();
        assert!(!mock.exists("tank/res1_00@res1.s1_00"));
        assert_eq!(
            mock.calls().last().unwrap(),
            &vec!["/sbin/zfs", "destroy", "tank/res1_00@res1.s1_00"]
        );
    }
}
