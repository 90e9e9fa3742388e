//! LVM variants: plain logical volumes and thin volumes with one thin pool
//! per volume.
//!
//! ## Commands
//!
//! | Operation | argv                                                     |
//! |-----------|----------------------------------------------------------|
//! | exists    | `lvs --noheadings --options lv_name VG/NAME`             |
//! | create    | `lvcreate -n NAME -L SIZEk VG`                           |
//! | thin      | `lvcreate -n NAME -V SIZEk --thinpool POOL VG`           |
//! | pool      | `lvcreate -L SIZEk -T VG/POOL`                           |
//! | remove    | `lvremove --force VG/NAME`                               |
//! | extend    | `lvextend -L SIZEk VG/NAME`                              |
//! | capacity  | `vgs --noheadings --nosuffix --units k --separator , ...`|

use tracing::{info, instrument, warn};

use crate::command::{argv, Tool};
use crate::config::BackendConfig;
use crate::error::{BackendError, Result};
use crate::probe::{probe_capacity, probe_exists};
use crate::types::{BackendKind, BlockDevice};

use super::{PoolDriver, VolumeDriver};

/// Exit code of `lvs` for a logical volume that does not exist.
pub const LVM_NOT_FOUND_STATUS: i32 = 5;

/// Command builders shared by both LVM variants.
#[derive(Debug, Clone)]
struct LvmCommands {
    config: BackendConfig,
}

impl LvmCommands {
    /// `VG/NAME`
    fn lv(&self, name: &str) -> String {
        format!("{}/{}", self.config.volume_group, name)
    }
    
    fn exists(&self, tool: &Tool, name: &str) -> Result<bool> {
        let cmd = argv([
            self.config.tool("lvs"),
            "--noheadings".into(),
            "--options".into(),
            "lv_name".into(),
            self.lv(name),
        ]);
        probe_exists(tool, &cmd, name, LVM_NOT_FOUND_STATUS)
    }
    
    fn remove(&self, tool: &Tool, name: &str) -> Result<()> {
        tool.exec_checked(&argv([self.config.tool("lvremove"), "--force".into(), self.lv(name)]))?;
        Ok(())
    }
    
    fn extend(&self, tool: &Tool, name: &str, size_kib: u64) -> Result<()> {
        tool.exec_checked(&argv([
            self.config.tool("lvextend"),
            "-L".into(),
            format!("{}k", size_kib),
            self.lv(name),
        ]))?;
        Ok(())
    }
    
    fn change(&self, tool: &Tool, flags: &[&str], name: &str) -> Result<()> {
        let mut cmd = vec![self.config.tool("lvchange")];
        cmd.extend(flags.iter().map(|f| f.to_string()));
        cmd.push(self.lv(name));
        tool.exec_checked(&cmd)?;
        Ok(())
    }
    
    fn capacity(&self, tool: &Tool) -> Result<(u64, u64)> {
        let cmd = argv([
            self.config.tool("vgs"),
            "--noheadings".into(),
            "--nosuffix".into(),
            "--units".into(),
            "k".into(),
            "--separator".into(),
            ",".into(),
            "--options".into(),
            "vg_size,vg_free".into(),
            self.config.volume_group.clone(),
        ]);
        probe_capacity(tool, &cmd, |fields| match fields {
            [total, free] => Some((*total, *free)),
            _ => None,
        })
    }
}

/// Plain (thick) LVM logical volumes in one volume group.
#[derive(Debug, Clone)]
pub struct LvmDriver {
    cmds: LvmCommands,
}

impl LvmDriver {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            cmds: LvmCommands { config },
        }
    }
}

impl VolumeDriver for LvmDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Lvm
    }
    
    fn config(&self) -> &BackendConfig {
        &self.cmds.config
    }
    
    fn set_config(&mut self, config: BackendConfig) {
        self.cmds.config = config;
    }
    
    fn volume_exists(&self, tool: &Tool, name: &str) -> Result<bool> {
        self.cmds.exists(tool, name)
    }
    
    #[instrument(skip(self, tool), fields(backend = "lvm"))]
    fn create_volume(&self, tool: &Tool, name: &str, size_kib: u64, pool: Option<&str>) -> Result<()> {
        if let Some(pool) = pool {
            warn!(pool = %pool, "Plain LVM volumes do not use pools, ignoring");
        }
        
        tool.exec_checked(&argv([
            self.cmds.config.tool("lvcreate"),
            "-n".into(),
            name.to_string(),
            "-L".into(),
            format!("{}k", size_kib),
            self.cmds.config.volume_group.clone(),
        ]))?;
        
        info!("Logical volume created");
        Ok(())
    }
    
    fn remove_volume(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.remove(tool, name)
    }
    
    fn extend_volume(&self, tool: &Tool, name: &str, size_kib: u64) -> Result<()> {
        self.cmds.extend(tool, name, size_kib)
    }
    
    /// Classic snapshot, sized like its origin.
    #[instrument(skip(self, tool, source), fields(backend = "lvm", source = %source.name()))]
    fn create_snapshot(&self, tool: &Tool, source: &BlockDevice, snapshot: &str) -> Result<()> {
        tool.exec_checked(&argv([
            self.cmds.config.tool("lvcreate"),
            "-s".into(),
            "-L".into(),
            format!("{}k", source.size_kib()),
            "-n".into(),
            snapshot.to_string(),
            self.cmds.lv(source.name()),
        ]))?;
        
        info!("Snapshot volume created");
        Ok(())
    }
    
    fn pool_capacity(&self, tool: &Tool) -> Result<(u64, u64)> {
        self.cmds.capacity(tool)
    }
    
    fn activate(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.change(tool, &["-ay"], name)
    }
    
    fn deactivate(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.change(tool, &["-an"], name)
    }
}

/// Thin LVM volumes, each inside its own thin pool.
#[derive(Debug, Clone)]
pub struct ThinLvDriver {
    cmds: LvmCommands,
}

impl ThinLvDriver {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            cmds: LvmCommands { config },
        }
    }
}

impl VolumeDriver for ThinLvDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::ThinLv
    }
    
    fn config(&self) -> &BackendConfig {
        &self.cmds.config
    }
    
    fn set_config(&mut self, config: BackendConfig) {
        self.cmds.config = config;
    }
    
    fn volume_exists(&self, tool: &Tool, name: &str) -> Result<bool> {
        self.cmds.exists(tool, name)
    }
    
    #[instrument(skip(self, tool), fields(backend = "thinlv"))]
    fn create_volume(&self, tool: &Tool, name: &str, size_kib: u64, pool: Option<&str>) -> Result<()> {
        let pool = pool.ok_or_else(|| {
            BackendError::InvalidConfig(format!("thin volume {} needs a thin pool", name))
        })?;
        
        tool.exec_checked(&argv([
            self.cmds.config.tool("lvcreate"),
            "-n".into(),
            name.to_string(),
            "-V".into(),
            format!("{}k", size_kib),
            "--thinpool".into(),
            pool.to_string(),
            self.cmds.config.volume_group.clone(),
        ]))?;
        
        info!("Thin volume created");
        Ok(())
    }
    
    fn remove_volume(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.remove(tool, name)
    }
    
    fn extend_volume(&self, tool: &Tool, name: &str, size_kib: u64) -> Result<()> {
        self.cmds.extend(tool, name, size_kib)
    }
    
    /// Thin snapshot in the origin's pool, activated right away.
    #[instrument(skip(self, tool, source), fields(backend = "thinlv", source = %source.name()))]
    fn create_snapshot(&self, tool: &Tool, source: &BlockDevice, snapshot: &str) -> Result<()> {
        tool.exec_checked(&argv([
            self.cmds.config.tool("lvcreate"),
            "-s".into(),
            "-n".into(),
            snapshot.to_string(),
            self.cmds.lv(source.name()),
        ]))?;
        
        // thin snapshots carry the activation-skip flag
        if let Err(e) = self.cmds.change(tool, &["-ay", "-kn", "-K"], snapshot) {
            warn!(snapshot = %snapshot, error = %e, "Snapshot created but activation failed");
        }
        
        info!("Thin snapshot created");
        Ok(())
    }
    
    fn pool_capacity(&self, tool: &Tool) -> Result<(u64, u64)> {
        self.cmds.capacity(tool)
    }
    
    fn activate(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.change(tool, &["-ay", "-K"], name)
    }
    
    fn deactivate(&self, tool: &Tool, name: &str) -> Result<()> {
        self.cmds.change(tool, &["-an"], name)
    }
    
    fn pools(&self) -> Option<&dyn PoolDriver> {
        Some(self)
    }
}

impl PoolDriver for ThinLvDriver {
    fn pool_exists(&self, tool: &Tool, pool: &str) -> Result<bool> {
        self.cmds.exists(tool, pool)
    }
    
    #[instrument(skip(self, tool), fields(backend = "thinlv"))]
    fn create_pool(&self, tool: &Tool, pool: &str, size_kib: u64) -> Result<()> {
        tool.exec_checked(&argv([
            self.cmds.config.tool("lvcreate"),
            "-L".into(),
            format!("{}k", size_kib),
            "-T".into(),
            self.cmds.lv(pool),
        ]))?;
        
        info!("Thin pool created");
        Ok(())
    }
    
    fn remove_pool(&self, tool: &Tool, pool: &str) -> Result<()> {
        self.cmds.remove(tool, pool)
    }
    
    fn extend_pool(&self, tool: &Tool, pool: &str, size_kib: u64) -> Result<()> {
        self.cmds.extend(tool, pool, size_kib)
    }
}
