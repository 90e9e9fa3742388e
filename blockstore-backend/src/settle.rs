//! Waiting for device nodes to show up.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// How long a restored copy-on-write volume may take to appear.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting.
pub const SETTLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            timeout: SETTLE_TIMEOUT,
            interval: SETTLE_INTERVAL,
        }
    }
}

impl SettlePolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
    
    pub fn wait(&self, path: impl AsRef<Path>) -> bool {
        wait_for_device(path, self.timeout, self.interval)
    }
}

/// Poll until `path` exists. Returns `false` if it did not appear in time.
pub fn wait_for_device(path: impl AsRef<Path>, timeout: Duration, interval: Duration) -> bool {
    let path = path.as_ref();
    let deadline = Instant::now() + timeout;
    
    loop {
        if path.exists() {
            debug!(path = %path.display(), "Device node present");
            return true;
        }
        
        let now = Instant::now();
        if now >= deadline {
            debug!(path = %path.display(), ?timeout, "Device node did not appear");
            return false;
        }
        thread::sleep(interval.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_existing_node_settles_at_once() {
        let dir = tempfile::tempdir().unwrap();
        assert!(wait_for_device(dir.path(), Duration::ZERO, SETTLE_INTERVAL));
    }
    
    #[test]
    fn test_missing_node_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let found = wait_for_device(dir.path().join("zd0"), Duration::from_millis(50), Duration::from_millis(10));
        assert!(!found);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
    
    #[test]
    fn test_node_appearing_later() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("zd16");
        let writer = {
            let node = node.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                std::fs::write(node, b"").unwrap();
            })
        };
        
        assert!(SettlePolicy::new(Duration::from_secs(5), Duration::from_millis(5)).wait(&node));
        writer.join().unwrap();
    }
}
