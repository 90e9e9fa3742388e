//! Volume, snapshot and pool naming.
//!
//! ```text
//! volume    res1_00
//! snapshot  res1.snap1_00        (prefix of the source + "." + base + slot)
//! pool      res1_00_20240131235959
//! ```

use chrono::{DateTime, TimeZone};

use crate::error::{BackendError, Result};

/// Longest name accepted for volumes and pools.
pub const MAX_NAME_LEN: usize = 127;

/// Render a slot index with at least two digits.
pub fn slot_suffix(slot: u32) -> String {
    format!("{:02}", slot)
}

/// Canonical volume name for a resource volume slot.
pub fn volume_name(resource: &str, slot: u32) -> String {
    format!("{}_{}", resource, slot_suffix(slot))
}

/// Resource prefix of an existing volume or snapshot name.
///
/// Cut at the first `.` if there is one (snapshots), otherwise at the last `_`
/// (slot suffix of plain volumes).
pub fn resource_prefix(name: &str) -> &str {
    if let Some(idx) = name.find('.') {
        &name[..idx]
    } else if let Some(idx) = name.rfind('_') {
        &name[..idx]
    } else {
        name
    }
}

/// Name of a snapshot volume derived from its source volume.
pub fn snapshot_name(source: &str, snapshot: &str, slot: u32) -> String {
    format!("{}.{}_{}", resource_prefix(source), snapshot, slot_suffix(slot))
}

/// Name of a freshly generated pool for a resource volume slot.
///
/// The timestamp keeps repeated create attempts from colliding.
pub fn pool_name<Tz: TimeZone>(resource: &str, slot: u32, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}_{}_{}", resource, slot_suffix(slot), at.format("%Y%m%d%H%M%S"))
}

/// Check a resource, snapshot or pool name.
///
/// Alphanumerics and `_` anywhere, `-` anywhere but the first character.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BackendError::InvalidName("empty name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BackendError::InvalidName(format!(
            "{} exceeds {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if name.starts_with('-') {
        return Err(BackendError::InvalidName(format!("{} starts with '-'", name)));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(BackendError::InvalidName(format!(
            "{} contains invalid character {:?}",
            name, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    
    #[test]
    fn test_volume_name() {
        assert_eq!(volume_name("res1", 0), "res1_00");
        assert_eq!(volume_name("res1", 7), "res1_07");
        assert_eq!(volume_name("res1", 123), "res1_123");
    }
    
    #[test]
    fn test_snapshot_name_from_volume() {
        assert_eq!(snapshot_name("res1_00", "snap1", 0), "res1.snap1_00");
        assert_eq!(snapshot_name("my_res_03", "daily", 3), "my_res.daily_03");
    }
    
    #[test]
    fn test_snapshot_name_from_snapshot() {
        assert_eq!(snapshot_name("res1.snap1_00", "snap2", 0), "res1.snap2_00");
    }
    
    #[test]
    fn test_resource_prefix_without_separator() {
        assert_eq!(resource_prefix("plain"), "plain");
    }
    
    #[test]
    fn test_pool_name_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap();
        assert_eq!(pool_name("res1", 2, &at), "res1_02_20240131235958");
    }
    
    #[test]
    fn test_validate_name() {
        assert!(validate_name("res1").is_ok());
        assert!(validate_name("res-1_a").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("-res").is_err());
        assert!(validate_name("res/1").is_err());
        assert!(validate_name("res 1").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
