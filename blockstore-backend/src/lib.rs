//! # blockstore backend
//!
//! Allocates, removes, extends and snapshots the backing block devices of
//! replicated storage resources by driving LVM or ZFS command-line tools.
//!
//! Every backend keeps a signed, locally persisted inventory of the volumes
//! it created and refuses to touch volumes it does not know about.
//!
//! ## Variants
//!
//! - **lvm**: plain logical volumes
//! - **thinlv**: thin volumes, each inside its own thin pool
//! - **zvol** / **thinzvol**: ZFS volumes, snapshots via snapshot + clone
//!
//! ## Example
//!
//! ```no_run
//! use blockstore_backend::{Backend, BackendConfig, BackendKind};
//!
//! let config = BackendConfig::defaults(BackendKind::Lvm);
//! let mut backend = Backend::new(BackendKind::Lvm, config)?;
//! if let Some(device) = backend.create_block_device("res1", 0, 1048576) {
//!     println!("{}", device.path());
//! }
//! # Ok::<(), blockstore_backend::BackendError>(())
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod drivers;
pub mod error;
pub mod inventory;
pub mod manager;
pub mod mock;
pub mod naming;
pub mod persist;
pub mod probe;
pub mod retry;
pub mod settle;
pub mod types;

pub use backend::Backend;
pub use command::{CommandOutput, CommandRunner, SystemRunner, Tool};
pub use config::BackendConfig;
pub use drivers::{driver_for, PoolDriver, VolumeDriver};
pub use error::{BackendError, Result};
pub use inventory::Inventory;
pub use manager::StorageManager;
pub use mock::MockTool;
pub use persist::{SignatureStatus, StateStore};
pub use retry::{RetryPolicy, MAX_RETRIES, RETRY_DELAY};
pub use settle::{wait_for_device, SettlePolicy};
pub use types::{BackendKind, BlockDevice, CapacityReport, OpStatus, Pool};
