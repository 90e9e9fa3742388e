//! Integration tests for the ZFS backends.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use blockstore_backend::{
    driver_for, Backend, BackendConfig, BackendKind, MockTool, OpStatus, RetryPolicy, SettlePolicy,
};

fn open(mock: &Arc<MockTool>, kind: BackendKind, config: BackendConfig, state_file: &Path) -> Backend {
    Backend::with_parts(driver_for(kind, config), mock.clone(), state_file)
        .unwrap()
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
        .with_settle(SettlePolicy::new(Duration::ZERO, Duration::from_millis(1)))
}

fn zvol(mock: &Arc<MockTool>, state_file: &Path) -> Backend {
    let config = BackendConfig::defaults(BackendKind::Zvol).with_volume_group("tank");
    open(mock, BackendKind::Zvol, config, state_file)
}

/// Test that a snapshot is a ZFS snapshot plus a clone sized like its source.
#[test]
fn test_snapshot_clones_source() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let mut backend = zvol(&mock, &dir.path().join("state.json"));
    
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    assert_eq!(device.path(), "/dev/zvol/tank/res1_00");
    
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();
    assert_eq!(snapshot.name(), "res1.s1_00");
    assert_eq!(snapshot.size_kib(), 2048);
    assert!(mock.exists("tank/res1_00@res1.s1_00"));
    assert!(mock.exists("tank/res1.s1_00"));
}

/// Test that a restore which never settles reports size 0.
#[test]
fn test_restore_without_settle_has_no_size() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let mut backend = zvol(&mock, &dir.path().join("state.json"));
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();
    
    let restored = backend.restore_snapshot("res2", 0, &snapshot).unwrap();
    assert_eq!(restored.name(), "res2_00");
    assert_eq!(restored.size_kib(), 0);
    assert_eq!(backend.get_block_device("res2_00").unwrap().size_kib(), 0);
    assert_eq!(
        mock.calls().last().unwrap(),
        &vec!["/sbin/zfs", "list", "-H", "-o", "name", "tank/res2_00"]
    );
    assert_eq!(mock.count_calls("zfs clone"), 2);
}

/// Test that a settled restore picks up the size reported by the tool.
#[test]
fn test_restore_reads_size_after_settle() {
    let dir = tempfile::tempdir().unwrap();
    let dev = dir.path().join("dev");
    fs::create_dir_all(dev.join("tank")).unwrap();
    fs::write(dev.join("tank").join("res2_00"), b"").unwrap();
    
    let mut config = BackendConfig::defaults(BackendKind::Zvol).with_volume_group("tank");
    config.dev_path = format!("{}/", dev.display());
    let mock = Arc::new(MockTool::new());
    let state_file = dir.path().join("state.json");
    let mut backend = open(&mock, BackendKind::Zvol, config.clone(), &state_file)
        .with_settle(SettlePolicy::new(Duration::from_secs(1), Duration::from_millis(10)));
    
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();
    let restored = backend.restore_snapshot("res2", 0, &snapshot).unwrap();
    
    assert_eq!(restored.size_kib(), 2048);
    assert_eq!(mock.count_calls("zfs get"), 2);
    
    let reopened = open(&mock, BackendKind::Zvol, config, &state_file);
    assert_eq!(reopened.get_block_device("res2_00").unwrap().size_kib(), 2048);
}

/// Test that clones are removed before the volume they were cloned from.
#[test]
fn test_remove_clone_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let mut backend = zvol(&mock, &dir.path().join("state.json"));
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();
    let restored = backend.restore_snapshot("res2", 0, &snapshot).unwrap();
    
    assert!(backend.remove_block_device(&restored).is_success());
    assert!(backend.remove_snapshot(&snapshot).is_success());
    assert!(backend.remove_block_device(&device).is_success());
    
    assert!(backend.list_block_devices().is_empty());
    assert!(!mock.exists("tank/res1_00"));
    assert!(!mock.exists("tank/res1_00@res1.s1_00"));
}

/// Test that a removed snapshot can be taken again under the same name.
#[test]
fn test_snapshot_recreated_after_removal() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let mut backend = zvol(&mock, &dir.path().join("state.json"));
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();

    assert!(backend.remove_snapshot(&snapshot).is_success());
    assert!(!mock.exists("tank/res1.s1_00"));
    assert!(!mock.exists("tank/res1_00@res1.s1_00"));

    let again = backend.try_create_snapshot("s1", 0, &device).unwrap();
    assert_eq!(again.name(), "res1.s1_00");
    assert!(mock.exists("tank/res1_00@res1.s1_00"));
}

/// Test that an origin snapshot still used by a restored volume is kept.
#[test]
fn test_origin_kept_while_restored_volume_uses_it() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let mut backend = zvol(&mock, &dir.path().join("state.json"));
    let device = backend.create_block_device("res1", 0, 2048).unwrap();
    let snapshot = backend.create_snapshot("s1", 0, &device).unwrap();
    let restored = backend.restore_snapshot("res2", 0, &snapshot).unwrap();

    assert!(backend.remove_snapshot(&snapshot).is_success());
    assert!(mock.exists("tank/res1_00@res1.s1_00"));
    assert!(mock.exists("tank/res2_00"));

    assert!(backend.remove_block_device(&restored).is_success());
    assert!(!mock.exists("tank/res1_00@res1.s1_00"));
}

/// Test sparse creation, no-op activation and byte-based capacity.
#[test]
fn test_thin_zvol() {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockTool::new());
    let config = BackendConfig::defaults(BackendKind::ThinZvol).with_volume_group("tank");
    let mut backend = open(&mock, BackendKind::ThinZvol, config, &dir.path().join("state.json"));
    
    let device = backend.create_block_device("res1", 0, 4096).unwrap();
    assert_eq!(mock.calls()[1], vec!["/sbin/zfs", "create", "-s", "-V", "4096k", "tank/res1_00"]);
    
    mock.clear_calls();
    assert!(backend.up_block_device(&device).is_success());
    assert!(backend.down_block_device(&device).is_success());
    assert!(mock.calls().is_empty());
    
    mock.set_capacity_output("1048576\t3145728\n");
    let report = backend.update_pool_capacity();
    assert_eq!(report.status, OpStatus::Success);
    assert_eq!((report.total_kib, report.free_kib), (4096, 3072));
}
