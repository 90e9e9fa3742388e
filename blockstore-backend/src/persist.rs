//! Signed state file.
//!
//! Layout:
//!
//! ```text
//! {
//!   "pools": { ... },
//!   "volumes": { ... }
//! }
//! sig:<sha256 hex of every byte above this line>
//! ```
//!
//! The signature is advisory. A missing or mismatching signature is logged and
//! the parsed content is used anyway; only unreadable or unparsable files fail.
//! The file is rewritten in place on every save, without atomic rename and
//! without locking against other processes.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{BackendError, Result};
use crate::inventory::Inventory;

/// Prefix of the trailing signature line.
pub const SIGNATURE_PREFIX: &str = "sig:";

/// Result of checking the signature of a loaded state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The signature matches the content
    Valid,
    /// No signature line was found
    Missing,
    /// A signature line was found but does not match
    Mismatch,
    /// There was no state file yet
    NoFile,
}

/// Reads and writes one backend's state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    
    pub fn path(&self) -> &Path {
        &self.path
    }
    
    /// Load the inventory; a missing file yields an empty inventory.
    pub fn load(&self) -> Result<Inventory> {
        self.load_verified().map(|(inventory, _)| inventory)
    }
    
    /// Load the inventory and report how its signature checked out.
    pub fn load_verified(&self) -> Result<(Inventory, SignatureStatus)> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting with an empty inventory");
                return Ok((Inventory::new(), SignatureStatus::NoFile));
            }
            Err(e) => {
                return Err(BackendError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        
        let (content, status) = split_signed(&text);
        match status {
            SignatureStatus::Valid => debug!(path = %self.path.display(), "State file signature verified"),
            SignatureStatus::Missing => warn!(path = %self.path.display(), "State file is not signed"),
            SignatureStatus::Mismatch => {
                warn!(path = %self.path.display(), "State file signature mismatch, content may be corrupt")
            }
            SignatureStatus::NoFile => {}
        }
        
        if content.trim().is_empty() {
            return Ok((Inventory::new(), status));
        }
        
        let mut inventory: Inventory = serde_json::from_str(content).map_err(|e| {
            BackendError::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        inventory.rebuild_lookup();
        
        Ok((inventory, status))
    }
    
    /// Overwrite the state file with `inventory`.
    pub fn save(&self, inventory: &Inventory) -> Result<()> {
        let json = serde_json::to_string_pretty(inventory)
            .map_err(|e| BackendError::Persistence(format!("failed to serialize inventory: {}", e)))?;
        let data = sign(&format!("{}\n", json));
        
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    BackendError::Persistence(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        
        fs::write(&self.path, data).map_err(|e| {
            BackendError::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })?;
        
        debug!(path = %self.path.display(), "State file saved");
        Ok(())
    }
}

/// Hex SHA-256 of `data`.
pub fn digest(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Append the signature line for `content` (which already ends in a newline).
pub fn sign(content: &str) -> String {
    format!("{}{}{}\n", content, SIGNATURE_PREFIX, digest(content))
}

/// Separate the content from a trailing signature line.
///
/// Lines are scanned one by one and the last `sig:` line wins; it may lack a
/// trailing newline. Everything before that line is the signed content.
pub fn split_signed(text: &str) -> (&str, SignatureStatus) {
    let mut offset = 0;
    let mut found: Option<(usize, &str)> = None;
    
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if let Some(sig) = trimmed.strip_prefix(SIGNATURE_PREFIX) {
            found = Some((offset, sig.trim()));
        }
        offset += line.len();
    }
    
    let Some((start, sig)) = found else {
        return (text, SignatureStatus::Missing);
    };
    
    let content = &text[..start];
    // files written without the separating newline in the signed bytes
    let legacy = content.strip_suffix('\n').unwrap_or(content);
    let status = if sig.eq_ignore_ascii_case(&digest(content)) || sig.eq_ignore_ascii_case(&digest(legacy)) {
        SignatureStatus::Valid
    } else {
        SignatureStatus::Mismatch
    };
    
    (content, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockDevice, Pool};
    
    fn sample() -> Inventory {
        let mut inv = Inventory::new();
        inv.insert_pool(Pool::new("res1_00_20240101000000", 1415578));
        inv.insert_volume(BlockDevice::new("res1_00", 1048576, "/dev/drbdpool/res1_00"));
        inv.insert_volume(BlockDevice::new("res2_01", 2048, "/dev/drbdpool/res2_01"));
        inv.add_member("res1_00_20240101000000", "res1_00").unwrap();
        inv
    }
    
    #[test]
    fn test_missing_file_is_empty_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let (inv, status) = store.load_verified().unwrap();
        assert!(inv.is_empty());
        assert_eq!(status, SignatureStatus::NoFile);
    }
    
    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("state.json"));
        let inv = sample();
        store.save(&inv).unwrap();
        
        let (loaded, status) = store.load_verified().unwrap();
        assert_eq!(status, SignatureStatus::Valid);
        assert_eq!(loaded, inv);
        assert_eq!(loaded.pool_of("res1_00"), Some("res1_00_20240101000000"));
        assert!(loaded.is_consistent());
    }
    
    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        
        let text = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        let last = lines.last().unwrap();
        assert!(last.starts_with("sig:"));
        assert_eq!(last.len(), 4 + 64);
        assert!(text.ends_with('\n'));
        
        // sorted keys, pretty printed
        let pools_at = text.find("\"pools\"").unwrap();
        let volumes_at = text.find("\"volumes\"").unwrap();
        assert!(pools_at < volumes_at);
        assert!(text.starts_with("{\n  "));
        
        let body = &text[..text.rfind("sig:").unwrap()];
        assert_eq!(&last[4..], digest(body));
    }
    
    #[test]
    fn test_tampered_signature_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&sample()).unwrap();
        
        let mut text = fs::read_to_string(store.path()).unwrap();
        let idx = text.rfind("sig:").unwrap() + 4;
        let flipped = if &text[idx..idx + 1] == "0" { "1" } else { "0" };
        text.replace_range(idx..idx + 1, flipped);
        fs::write(store.path(), text).unwrap();
        
        let (loaded, status) = store.load_verified().unwrap();
        assert_eq!(status, SignatureStatus::Mismatch);
        assert_eq!(loaded, sample());
    }
    
    #[test]
    fn test_unsigned_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();
        
        let (loaded, status) = StateStore::new(&path).load_verified().unwrap();
        assert_eq!(status, SignatureStatus::Missing);
        assert_eq!(loaded.volumes().count(), 2);
    }
    
    #[test]
    fn test_signature_without_trailing_newline() {
        let content = "{\"volumes\": {}}\n";
        let text = sign(content);
        let text = text.trim_end_matches('\n');
        let (body, status) = split_signed(text);
        assert_eq!(body, content);
        assert_eq!(status, SignatureStatus::Valid);
    }
    
    #[test]
    fn test_signature_over_content_without_separator() {
        let content = "{\"volumes\": {}}";
        let text = format!("{}\nsig:{}", content, digest(content));
        assert_eq!(split_signed(&text).1, SignatureStatus::Valid);
    }
    
    #[test]
    fn test_malformed_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, sign("{ not json\n")).unwrap();
        assert!(matches!(StateStore::new(&path).load(), Err(BackendError::Persistence(_))));
    }
    
    #[test]
    fn test_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be overwritten as a file
        let store = StateStore::new(dir.path());
        assert!(matches!(store.save(&sample()), Err(BackendError::Persistence(_))));
    }
}
