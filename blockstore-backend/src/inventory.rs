//! In-memory record of the volumes and pools a backend manages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BackendError, Result};
use crate::types::{BlockDevice, Pool};

/// Volumes (and, for pool-backed backends, pools) owned by one backend.
///
/// `lookup` maps a volume name to the pool hosting it. It is an index over
/// `Pool::members`, never persisted and rebuilt after every load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pools: BTreeMap<String, Pool>,
    #[serde(default)]
    volumes: BTreeMap<String, BlockDevice>,
    #[serde(skip)]
    lookup: BTreeMap<String, String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }
    
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.pools.is_empty()
    }
    
    pub fn volume(&self, name: &str) -> Option<&BlockDevice> {
        self.volumes.get(name)
    }
    
    pub fn contains_volume(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }
    
    /// All volumes ordered by name.
    pub fn volumes(&self) -> impl Iterator<Item = &BlockDevice> {
        self.volumes.values()
    }
    
    pub(crate) fn volume_mut(&mut self, name: &str) -> Option<&mut BlockDevice> {
        self.volumes.get_mut(name)
    }
    
    pub(crate) fn insert_volume(&mut self, device: BlockDevice) {
        self.volumes.insert(device.name().to_string(), device);
    }
    
    /// Forget a volume. Pool membership is left alone, see [`Self::release_member`].
    pub(crate) fn remove_volume(&mut self, name: &str) -> Option<BlockDevice> {
        self.volumes.remove(name)
    }
    
    pub fn pool(&self, name: &str) -> Option<&Pool> {
        self.pools.get(name)
    }
    
    /// All pools ordered by name.
    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }
    
    /// Pool hosting `volume`, if any.
    pub fn pool_of(&self, volume: &str) -> Option<&str> {
        self.lookup.get(volume).map(String::as_str)
    }
    
    pub(crate) fn pool_mut(&mut self, name: &str) -> Option<&mut Pool> {
        self.pools.get_mut(name)
    }
    
    pub(crate) fn insert_pool(&mut self, pool: Pool) {
        for member in pool.members() {
            self.lookup.insert(member.clone(), pool.name().to_string());
        }
        self.pools.insert(pool.name().to_string(), pool);
    }
    
    /// Forget a pool record together with any lookup entries pointing at it.
    pub(crate) fn remove_pool(&mut self, name: &str) -> Option<Pool> {
        let pool = self.pools.remove(name)?;
        for member in pool.members() {
            self.lookup.remove(member);
        }
        Some(pool)
    }
    
    /// Names of pools that host no volume.
    pub fn empty_pools(&self) -> Vec<String> {
        self.pools
            .values()
            .filter(|p| p.is_empty())
            .map(|p| p.name().to_string())
            .collect()
    }
    
    /// Record `volume` as a member of `pool`.
    pub(crate) fn add_member(&mut self, pool: &str, volume: &str) -> Result<()> {
        if let Some(current) = self.lookup.get(volume) {
            if current != pool {
                return Err(BackendError::OperationFailed(format!(
                    "volume {} already belongs to pool {}",
                    volume, current
                )));
            }
        }
        
        let record = self.pools.get_mut(pool).ok_or_else(|| {
            BackendError::OperationFailed(format!("pool {} is not managed", pool))
        })?;
        record.members_mut().insert(volume.to_string());
        self.lookup.insert(volume.to_string(), pool.to_string());
        Ok(())
    }
    
    /// Drop `volume` from its pool and return that pool's name.
    pub(crate) fn release_member(&mut self, volume: &str) -> Option<String> {
        let pool = self.lookup.remove(volume)?;
        if let Some(record) = self.pools.get_mut(&pool) {
            record.members_mut().remove(volume);
        }
        Some(pool)
    }
    
    /// Rebuild the volume -> pool index from pool membership.
    ///
    /// A volume listed by more than one pool keeps its first pool (by name);
    /// it is dropped from the others.
    pub(crate) fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for pool in self.pools.values_mut() {
            let pool_name = pool.name().to_string();
            pool.members_mut().retain(|member| {
                if let Some(owner) = self.lookup.get(member) {
                    warn!(volume = %member, pool = %pool_name, owner = %owner, "Volume listed in two pools, keeping first");
                    return false;
                }
                self.lookup.insert(member.clone(), pool_name.clone());
                true
            });
        }
    }
    
    /// Whether the lookup index agrees with pool membership in both directions.
    pub fn is_consistent(&self) -> bool {
        let forward = self.lookup.iter().all(|(volume, pool)| {
            self.pools
                .get(pool)
                .map(|p| p.members().contains(volume))
                .unwrap_or(false)
        });
        let backward = self.pools.values().all(|pool| {
            pool.members()
                .iter()
                .all(|member| self.lookup.get(member).map(String::as_str) == Some(pool.name()))
        });
        forward && backward
    }
}
