//! # blockstore
//!
//! Command-line front end for the volume backends. Each invocation loads the
//! backend options, opens one backend with its persisted inventory, runs a
//! single operation and prints the result as JSON.
//!
//! ## Usage
//! ```bash
//! blockstore --backend thinlv -o volume-group=vg0 create res1 0 1048576
//! blockstore --backend zvol list
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;

use blockstore_backend::{Backend, BackendConfig, BackendKind, BlockDevice, OpStatus};
use blockstore_common::LogFormat;

mod cli;
mod config;

use cli::{Args, Command};

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    
    match args.log_format.parse::<LogFormat>()? {
        LogFormat::Text => blockstore_common::init_logging(&args.log_level)?,
        LogFormat::Json => blockstore_common::init_logging_json(&args.log_level)?,
    }
    
    let kind: BackendKind = args
        .backend
        .parse()
        .with_context(|| format!("Invalid backend: {}", args.backend))?;
    let options = config::resolve(&args)?;
    let backend_config = BackendConfig::from_options(kind, &options);
    
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %kind,
        volume_group = %backend_config.volume_group,
        "Starting blockstore"
    );
    
    let mut backend = Backend::new(kind, backend_config).context("Failed to open backend")?;
    let (status, output) = run(&mut backend, args.command);
    
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run one operation and describe its outcome.
fn run(backend: &mut Backend, command: Command) -> (OpStatus, Value) {
    match command {
        Command::Create { resource, slot, size_kib } => {
            created(backend.create_block_device(&resource, slot, size_kib))
        }
        Command::Remove { volume } => {
            let status = backend.remove_block_device(&device(backend, &volume));
            (status, json!({ "status": status, "volume": volume }))
        }
        Command::Extend { volume, size_kib } => {
            let status = backend.extend_block_device(&device(backend, &volume), size_kib);
            (status, json!({ "status": status, "volume": volume, "size_kib": size_kib }))
        }
        Command::Snapshot { source, snapshot, slot } => {
            let source = device(backend, &source);
            created(backend.create_snapshot(&snapshot, slot, &source))
        }
        Command::Restore { snapshot, resource, slot } => {
            let snapshot = device(backend, &snapshot);
            created(backend.restore_snapshot(&resource, slot, &snapshot))
        }
        Command::RemoveSnapshot { snapshot } => {
            let status = backend.remove_snapshot(&device(backend, &snapshot));
            (status, json!({ "status": status, "snapshot": snapshot }))
        }
        Command::Up { volume } => {
            let status = backend.up_block_device(&device(backend, &volume));
            (status, json!({ "status": status, "volume": volume }))
        }
        Command::Down { volume } => {
            let status = backend.down_block_device(&device(backend, &volume));
            (status, json!({ "status": status, "volume": volume }))
        }
        Command::Capacity => {
            let report = backend.update_pool_capacity();
            (report.status, json!(report))
        }
        Command::Show { volume } => match backend.get_block_device(&volume) {
            Some(device) => (OpStatus::Success, json!(device)),
            None => (OpStatus::StorageError, json!({ "status": OpStatus::StorageError, "volume": volume })),
        },
        Command::List { pools: true } => (OpStatus::Success, json!(backend.list_pools())),
        Command::List { pools: false } => (OpStatus::Success, json!(backend.list_block_devices())),
        Command::Reconcile => match backend.reconcile_pools() {
            Ok(dropped) => (OpStatus::Success, json!({ "status": OpStatus::Success, "dropped": dropped })),
            Err(e) => (
                OpStatus::StorageError,
                json!({ "status": OpStatus::StorageError, "error": e.to_string() }),
            ),
        },
    }
}

/// The managed device called `name`, or a placeholder the backend will refuse.
fn device(backend: &Backend, name: &str) -> BlockDevice {
    backend
        .get_block_device(name)
        .unwrap_or_else(|| BlockDevice::new(name, 0, backend.config().device_path(name)))
}

fn created(device: Option<BlockDevice>) -> (OpStatus, Value) {
    match device {
        Some(device) => (OpStatus::Success, json!(device)),
        None => (OpStatus::StorageError, json!({ "status": OpStatus::StorageError })),
    }
}
