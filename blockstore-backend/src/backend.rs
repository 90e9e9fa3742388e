//! The backend contract engine.
//!
//! A [`Backend`] owns one variant's [`VolumeDriver`], the inventory of
//! volumes and pools it created, and the signed state file that inventory is
//! persisted to. Every mutating operation follows the same shape:
//!
//! 1. probe the system for the target name and refuse foreign volumes
//! 2. invoke the tool and confirm the result with a probe, with bounded retries
//! 3. update the inventory and persist it
//! 4. if persisting fails, undo the side effect on a best-effort basis
//!
//! Each operation has a `try_*` form returning the root cause and a coarse
//! form returning [`OpStatus`] / `Option<BlockDevice>` for the orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, instrument, warn};

use crate::command::{CommandRunner, SystemRunner, Tool};
use crate::config::BackendConfig;
use crate::drivers::{driver_for, VolumeDriver};
use crate::error::{BackendError, Result};
use crate::inventory::Inventory;
use crate::naming;
use crate::persist::StateStore;
use crate::retry::{tolerate, RetryPolicy};
use crate::settle::SettlePolicy;
use crate::types::{BackendKind, BlockDevice, CapacityReport, OpStatus, Pool};

/// One storage backend instance.
///
/// Not internally synchronized: callers serialize access, see
/// [`StorageManager`](crate::manager::StorageManager).
pub struct Backend {
    driver: Box<dyn VolumeDriver>,
    tool: Tool,
    store: StateStore,
    inventory: Inventory,
    retry: RetryPolicy,
    settle: SettlePolicy,
}

impl Backend {
    /// Create a backend driving the real tools, with its fixed state file.
    pub fn new(kind: BackendKind, config: BackendConfig) -> Result<Self> {
        let driver = driver_for(kind, config);
        let state_file = driver.default_state_file();
        Self::with_parts(driver, Arc::new(SystemRunner), state_file)
    }

    /// Assemble a backend from its parts and load its inventory.
    pub fn with_parts(
        driver: Box<dyn VolumeDriver>,
        runner: Arc<dyn CommandRunner>,
        state_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        let tool = Tool::new(runner, driver.kind());
        let store = StateStore::new(state_file);
        let inventory = store.load()?;

        let mut backend = Self {
            driver,
            tool,
            store,
            inventory,
            retry: RetryPolicy::default(),
            settle: SettlePolicy::default(),
        };

        info!(
            backend = %backend.kind(),
            state_file = %backend.store.path().display(),
            volumes = backend.inventory.volumes().count(),
            pools = backend.inventory.pools().count(),
            "Backend initialized"
        );
        backend.reconcile_logged();

        Ok(backend)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_settle(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    pub fn config(&self) -> &BackendConfig {
        self.driver.config()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn state_file(&self) -> &Path {
        self.store.path()
    }

    /// Create volume `slot` of `resource`.
    pub fn create_block_device(&mut self, resource: &str, slot: u32, size_kib: u64) -> Option<BlockDevice> {
        let result = self.try_create_block_device(resource, slot, size_kib);
        self.report("create", resource, result).ok()
    }

    pub fn remove_block_device(&mut self, device: &BlockDevice) -> OpStatus {
        let result = self.try_remove_block_device(device);
        OpStatus::from(&self.report("remove", device.name(), result))
    }

    pub fn extend_block_device(&mut self, device: &BlockDevice, size_kib: u64) -> OpStatus {
        let result = self.try_extend_block_device(device, size_kib);
        OpStatus::from(&self.report("extend", device.name(), result))
    }

    /// Snapshot `source` as `snapshot`, slot `slot`.
    pub fn create_snapshot(&mut self, snapshot: &str, slot: u32, source: &BlockDevice) -> Option<BlockDevice> {
        let result = self.try_create_snapshot(snapshot, slot, source);
        self.report("snapshot", source.name(), result).ok()
    }

    /// Create volume `slot` of `resource` from the snapshot volume `snapshot`.
    pub fn restore_snapshot(&mut self, resource: &str, slot: u32, snapshot: &BlockDevice) -> Option<BlockDevice> {
        let result = self.try_restore_snapshot(resource, slot, snapshot);
        self.report("restore", snapshot.name(), result).ok()
    }

    pub fn remove_snapshot(&mut self, device: &BlockDevice) -> OpStatus {
        let result = self.try_remove_snapshot(device);
        OpStatus::from(&self.report("remove snapshot", device.name(), result))
    }

    pub fn up_block_device(&self, device: &BlockDevice) -> OpStatus {
        let result = self.try_up_block_device(device);
        OpStatus::from(&self.report("activate", device.name(), result))
    }

    pub fn down_block_device(&self, device: &BlockDevice) -> OpStatus {
        let result = self.try_down_block_device(device);
        OpStatus::from(&self.report("deactivate", device.name(), result))
    }

    /// Total and free capacity of the volume group / ZFS pool.
    pub fn update_pool_capacity(&self) -> CapacityReport {
        match self.try_update_pool_capacity() {
            Ok((total_kib, free_kib)) => CapacityReport {
                status: OpStatus::Success,
                total_kib,
                free_kib,
            },
            Err(e) => {
                error!(backend = %self.kind(), error = %e, "Capacity query failed");
                CapacityReport::failed()
            }
        }
    }

    pub fn get_block_device(&self, name: &str) -> Option<BlockDevice> {
        self.inventory.volume(name).cloned()
    }

    pub fn list_block_devices(&self) -> Vec<BlockDevice> {
        self.inventory.volumes().cloned().collect()
    }

    pub fn list_pools(&self) -> Vec<Pool> {
        self.inventory.pools().cloned().collect()
    }

    #[instrument(skip(self), fields(backend = %self.kind()))]
    pub fn try_create_block_device(&mut self, resource: &str, slot: u32, size_kib: u64) -> Result<BlockDevice> {
        naming::validate_name(resource)?;
        let name = naming::volume_name(resource, slot);
        self.make_room(&name, true)?;

        let pool = if self.is_pooled() {
            Some(self.create_pool(resource, slot, size_kib)?)
        } else {
            None
        };

        info!(volume = %name, size_kib, pool = ?pool, "Creating volume");
        let created = self.confirm("create", &name, || {
            tolerate(self.driver.create_volume(&self.tool, &name, size_kib, pool.as_deref()))?;
            self.driver.volume_exists(&self.tool, &name)
        });
        if let Err(e) = created {
            if let Some(pool) = &pool {
                self.retire_pool(pool);
            }
            return Err(e);
        }

        let device = BlockDevice::new(&name, size_kib, self.driver.device_path(&name));
        self.register(device.clone(), pool.as_deref());
        self.persist_or_roll_back(&name)?;

        info!(volume = %name, path = %device.path(), "Volume created");
        Ok(device)
    }

    #[instrument(skip(self, device), fields(backend = %self.kind(), volume = %device.name()))]
    pub fn try_remove_block_device(&mut self, device: &BlockDevice) -> Result<()> {
        let name = device.name();
        self.ensure_managed(name)?;

        info!("Removing volume");
        self.remove_confirmed(name)?;
        self.drop_volume(name);

        info!("Volume removed");
        Ok(())
    }

    /// Grow a volume. The tool is invoked once, without retries.
    #[instrument(skip(self, device), fields(backend = %self.kind(), volume = %device.name()))]
    pub fn try_extend_block_device(&mut self, device: &BlockDevice, size_kib: u64) -> Result<()> {
        let name = device.name();
        self.ensure_managed(name)?;

        if let Some(pool) = self.inventory.pool_of(name).map(str::to_string) {
            self.grow_pool(&pool, size_kib)?;
        }

        info!(size_kib, "Extending volume");
        self.driver.extend_volume(&self.tool, name, size_kib)?;

        if let Some(volume) = self.inventory.volume_mut(name) {
            volume.set_size_kib(size_kib);
        }
        self.persist_logged();
        Ok(())
    }

    #[instrument(skip(self, source), fields(backend = %self.kind(), source = %source.name()))]
    pub fn try_create_snapshot(&mut self, snapshot: &str, slot: u32, source: &BlockDevice) -> Result<BlockDevice> {
        naming::validate_name(snapshot)?;
        let source = self.managed(source.name())?;
        let name = naming::snapshot_name(source.name(), snapshot, slot);
        self.make_room(&name, false)?;

        info!(snapshot = %name, "Creating snapshot");
        self.confirm("snapshot", &name, || {
            tolerate(self.driver.create_snapshot(&self.tool, &source, &name))?;
            self.driver.volume_exists(&self.tool, &name)
        })?;

        let pool = self.inventory.pool_of(source.name()).map(str::to_string);
        let device = BlockDevice::new(&name, source.size_kib(), self.driver.device_path(&name));
        self.register(device.clone(), pool.as_deref());
        self.persist_or_roll_back(&name)?;

        info!(snapshot = %name, "Snapshot created");
        Ok(device)
    }

    /// Copy-on-write variants return the volume with the size the tool
    /// reports once its device node settled, or size 0 if it never did.
    #[instrument(skip(self, snapshot), fields(backend = %self.kind(), snapshot = %snapshot.name()))]
    pub fn try_restore_snapshot(&mut self, resource: &str, slot: u32, snapshot: &BlockDevice) -> Result<BlockDevice> {
        naming::validate_name(resource)?;
        let snapshot = self.managed(snapshot.name())?;
        let name = naming::volume_name(resource, slot);
        self.make_room(&name, true)?;

        info!(volume = %name, "Restoring snapshot");
        self.confirm("restore", &name, || {
            tolerate(self.driver.restore_snapshot(&self.tool, &snapshot, &name))?;
            self.driver.volume_exists(&self.tool, &name)
        })?;

        let needs_settle = self.driver.restore_needs_settle();
        let size_kib = if needs_settle { 0 } else { snapshot.size_kib() };
        let pool = self.inventory.pool_of(snapshot.name()).map(str::to_string);
        let mut device = BlockDevice::new(&name, size_kib, self.driver.device_path(&name));
        self.register(device.clone(), pool.as_deref());
        self.persist_or_roll_back(&name)?;

        if needs_settle {
            if let Some(size_kib) = self.settled_size(&device) {
                device.set_size_kib(size_kib);
                if let Some(volume) = self.inventory.volume_mut(&name) {
                    volume.set_size_kib(size_kib);
                }
                self.persist_logged();
            }
        }

        info!(volume = %name, size_kib = device.size_kib(), "Snapshot restored");
        Ok(device)
    }

    pub fn try_remove_snapshot(&mut self, device: &BlockDevice) -> Result<()> {
        self.try_remove_block_device(device)
    }

    pub fn try_up_block_device(&self, device: &BlockDevice) -> Result<()> {
        self.ensure_managed(device.name())?;
        self.driver.activate(&self.tool, device.name())
    }

    pub fn try_down_block_device(&self, device: &BlockDevice) -> Result<()> {
        self.ensure_managed(device.name())?;
        self.driver.deactivate(&self.tool, device.name())
    }

    pub fn try_update_pool_capacity(&self) -> Result<(u64, u64)> {
        let (total_kib, free_kib) = self.driver.pool_capacity(&self.tool)?;
        debug!(backend = %self.kind(), total_kib, free_kib, "Capacity updated");
        Ok((total_kib, free_kib))
    }

    /// Apply a new configuration and reload the inventory from the state file.
    #[instrument(skip(self, config), fields(backend = %self.kind()))]
    pub fn reconfigure(&mut self, config: BackendConfig) -> Result<()> {
        info!(volume_group = %config.volume_group, tool_path = %config.tool_path, "Reconfiguring backend");
        self.driver.set_config(config);
        self.inventory = self.store.load()?;
        self.reconcile_logged();
        Ok(())
    }

    /// Remove pools left without members and drop their records.
    ///
    /// Returns the number of pool records dropped.
    #[instrument(skip(self), fields(backend = %self.kind()))]
    pub fn reconcile_pools(&mut self) -> Result<usize> {
        let mut dropped = 0;
        let mut outcome = Ok(());

        for pool in self.inventory.empty_pools() {
            match self.remove_pool_confirmed(&pool) {
                Ok(()) => {
                    self.inventory.remove_pool(&pool);
                    info!(pool = %pool, "Dropped empty pool");
                    dropped += 1;
                }
                Err(e) if e.is_abort() => {
                    outcome = Err(e);
                    break;
                }
                Err(e) => warn!(pool = %pool, error = %e, "Empty pool could not be removed"),
            }
        }

        if dropped > 0 {
            self.persist_logged();
        }
        outcome.map(|()| dropped)
    }

    fn reconcile_logged(&mut self) {
        if let Err(e) = self.reconcile_pools() {
            warn!(backend = %self.kind(), error = %e, "Pool reconciliation aborted");
        }
    }

    fn is_pooled(&self) -> bool {
        self.driver.pools().is_some()
    }

    fn ensure_managed(&self, name: &str) -> Result<()> {
        self.managed(name).map(|_| ())
    }

    fn managed(&self, name: &str) -> Result<BlockDevice> {
        self.inventory.volume(name).cloned().ok_or_else(|| {
            BackendError::Unmanaged(format!("{} is not managed by the {} backend", name, self.kind()))
        })
    }

    /// Make sure `name` is free on the system before creating it.
    ///
    /// A volume the inventory does not know is never touched. A known one is
    /// removed when `replace_known` is set and is an error otherwise.
    fn make_room(&mut self, name: &str, replace_known: bool) -> Result<()> {
        let exists = self.driver.volume_exists(&self.tool, name)?;
        let known = self.inventory.contains_volume(name);

        match (exists, known) {
            (false, false) => Ok(()),
            (false, true) => {
                warn!(volume = %name, "Managed volume is gone from the system, dropping its entry");
                self.drop_volume(name);
                Ok(())
            }
            (true, false) => Err(BackendError::Unmanaged(format!(
                "{} already exists and is not managed by the {} backend",
                name,
                self.kind()
            ))),
            (true, true) if replace_known => {
                warn!(volume = %name, "Removing leftover volume before recreating it");
                self.remove_confirmed(name)?;
                self.drop_volume(name);
                Ok(())
            }
            (true, true) => Err(BackendError::OperationFailed(format!("{} already exists", name))),
        }
    }

    /// Run `step` under the retry policy; an unconfirmed outcome is an error.
    fn confirm<F>(&self, action: &str, object: &str, step: F) -> Result<()>
    where
        F: FnMut() -> Result<bool>,
    {
        if self.retry.run(action, object, step)? {
            Ok(())
        } else {
            Err(BackendError::OperationFailed(format!(
                "{} of {} not confirmed after {} attempts",
                action,
                object,
                self.retry.attempts.max(1)
            )))
        }
    }

    fn remove_confirmed(&self, name: &str) -> Result<()> {
        self.confirm("remove", name, || {
            tolerate(self.driver.remove_volume(&self.tool, name))?;
            Ok(!self.driver.volume_exists(&self.tool, name)?)
        })
    }

    fn remove_pool_confirmed(&self, pool: &str) -> Result<()> {
        let Some(pools) = self.driver.pools() else {
            return Ok(());
        };
        if !pools.pool_exists(&self.tool, pool)? {
            debug!(pool, "Pool already gone");
            return Ok(());
        }

        self.confirm("remove pool", pool, || {
            tolerate(pools.remove_pool(&self.tool, pool))?;
            Ok(!pools.pool_exists(&self.tool, pool)?)
        })
    }

    /// Create a fresh pool for volume `slot` of `resource`.
    fn create_pool(&mut self, resource: &str, slot: u32, volume_kib: u64) -> Result<String> {
        let name = naming::pool_name(resource, slot, &Local::now());
        naming::validate_name(&name)?;
        let size_kib = self.driver.config().pool_size_for(volume_kib);

        let pools = self.driver.pools().ok_or_else(|| {
            BackendError::InvalidConfig(format!("the {} backend has no pools", self.kind()))
        })?;
        if pools.pool_exists(&self.tool, &name)? {
            return Err(BackendError::OperationFailed(format!("pool {} already exists", name)));
        }

        info!(pool = %name, size_kib, "Creating pool");
        self.confirm("create pool", &name, || {
            tolerate(pools.create_pool(&self.tool, &name, size_kib))?;
            pools.pool_exists(&self.tool, &name)
        })?;

        self.inventory.insert_pool(Pool::new(&name, size_kib));
        self.persist_logged();
        Ok(name)
    }

    /// Grow `pool` to fit a volume of `volume_kib`, if it is smaller.
    fn grow_pool(&mut self, pool: &str, volume_kib: u64) -> Result<()> {
        let Some(pools) = self.driver.pools() else {
            return Ok(());
        };
        let target = self.driver.config().pool_size_for(volume_kib);
        let current = self.inventory.pool(pool).map(Pool::size_kib).unwrap_or_default();
        if current >= target {
            return Ok(());
        }

        info!(pool, from_kib = current, to_kib = target, "Growing pool");
        pools.extend_pool(&self.tool, pool, target)?;
        if let Some(record) = self.inventory.pool_mut(pool) {
            record.set_size_kib(target);
        }
        Ok(())
    }

    /// Remove `pool` if it has no members left. Failures keep the record.
    fn retire_pool(&mut self, pool: &str) {
        if !self.inventory.pool(pool).is_some_and(Pool::is_empty) {
            return;
        }

        match self.remove_pool_confirmed(pool) {
            Ok(()) => {
                self.inventory.remove_pool(pool);
                info!(pool, "Empty pool removed");
                self.persist_logged();
            }
            Err(e) => {
                warn!(pool, error = %e, "Empty pool could not be removed, keeping its record");
                self.persist_logged();
            }
        }
    }

    fn register(&mut self, device: BlockDevice, pool: Option<&str>) {
        let name = device.name().to_string();
        self.inventory.insert_volume(device);
        if let Some(pool) = pool {
            if let Err(e) = self.inventory.add_member(pool, &name) {
                warn!(volume = %name, pool, error = %e, "Could not record pool membership");
            }
        }
    }

    /// Forget a volume that is confirmed absent, then retire its emptied pool.
    fn drop_volume(&mut self, name: &str) {
        self.inventory.remove_volume(name);
        let pool = self.inventory.release_member(name);
        self.persist_logged();

        if let Some(pool) = pool {
            self.retire_pool(&pool);
        }
    }

    fn persist_logged(&self) {
        if let Err(e) = self.store.save(&self.inventory) {
            warn!(backend = %self.kind(), error = %e, "Could not persist the inventory");
        }
    }

    /// Persist after creating `name`; on failure remove it again.
    fn persist_or_roll_back(&mut self, name: &str) -> Result<()> {
        let Err(e) = self.store.save(&self.inventory) else {
            return Ok(());
        };

        error!(backend = %self.kind(), volume = %name, error = %e, "Persisting failed, rolling back");
        match self.remove_confirmed(name) {
            Ok(()) => self.drop_volume(name),
            Err(rollback) => {
                warn!(volume = %name, error = %rollback, "Rollback failed, volume left in place");
            }
        }
        Err(e)
    }

    fn settled_size(&self, device: &BlockDevice) -> Option<u64> {
        if !self.settle.wait(device.path()) {
            warn!(volume = %device.name(), path = %device.path(), "Device did not settle, size unknown");
            return None;
        }

        match self.driver.query_volume_size(&self.tool, device.name()) {
            Ok(size_kib) => Some(size_kib),
            Err(e) => {
                warn!(volume = %device.name(), error = %e, "Could not read size of settled device");
                None
            }
        }
    }

    fn report<T>(&self, action: &str, object: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(backend = %self.kind(), volume = %object, action, error = %e, "Operation failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTool;
    use std::time::Duration;

    fn backend(kind: BackendKind) -> (Arc<MockTool>, Backend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockTool::new());
        let config = BackendConfig::defaults(kind).with_volume_group("vg0");
        let backend = Backend::with_parts(driver_for(kind, config), mock.clone(), dir.path().join("state.json"))
            .unwrap()
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
            .with_settle(SettlePolicy::new(Duration::ZERO, Duration::from_millis(1)));
        (mock, backend, dir)
    }

    #[test]
    fn test_invalid_resource_name_runs_nothing() {
        let (mock, mut backend, _dir) = backend(BackendKind::Lvm);
        assert!(matches!(
            backend.try_create_block_device("-bad", 0, 1024),
            Err(BackendError::InvalidName(_))
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_stale_entry_is_dropped_before_create() {
        let (mock, mut backend, _dir) = backend(BackendKind::Lvm);
        backend.try_create_block_device("res1", 0, 1024).unwrap();
        mock.remove_volume("vg0/res1_00");
        mock.clear_calls();

        backend.try_create_block_device("res1", 0, 2048).unwrap();
        assert_eq!(mock.count_calls("lvremove"), 0);
        assert_eq!(backend.get_block_device("res1_00").unwrap().size_kib(), 2048);
    }

    #[test]
    fn test_probe_failure_aborts_create() {
        let (mock, mut backend, _dir) = backend(BackendKind::Lvm);
        mock.fail_probes(3);
        assert!(matches!(
            backend.try_create_block_device("res1", 0, 1024),
            Err(BackendError::CheckFailed(_))
        ));
        assert_eq!(mock.count_calls("lvcreate"), 0);
    }

    #[test]
    fn test_existing_snapshot_target_is_not_replaced() {
        let (mock, mut backend, _dir) = backend(BackendKind::Lvm);
        let source = backend.try_create_block_device("res1", 0, 1024).unwrap();
        backend.try_create_snapshot("s1", 0, &source).unwrap();

        assert!(matches!(
            backend.try_create_snapshot("s1", 0, &source),
            Err(BackendError::OperationFailed(_))
        ));
        assert!(mock.exists("vg0/res1.s1_00"));
    }

    #[test]
    fn test_extend_updates_inventory_size() {
        let (mock, mut backend, _dir) = backend(BackendKind::Lvm);
        let device = backend.try_create_block_device("res1", 0, 1024).unwrap();

        assert!(backend.extend_block_device(&device, 4096).is_success());
        assert_eq!(backend.get_block_device("res1_00").unwrap().size_kib(), 4096);
        assert_eq!(mock.volume_size("vg0/res1_00"), Some(4096));
    }

    #[test]
    fn test_capacity_failure_reports_zeroes() {
        let (mock, backend, _dir) = backend(BackendKind::Lvm);
        mock.set_capacity_output("garbage\n");
        assert_eq!(backend.update_pool_capacity(), CapacityReport::failed());
    }
}
