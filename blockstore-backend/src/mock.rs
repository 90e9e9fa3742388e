//! Simulated volume-management tool for testing and development.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::debug;

use crate::command::{CommandOutput, CommandRunner};
use crate::drivers::{LVM_NOT_FOUND_STATUS, ZFS_NOT_FOUND_STATUS};

/// Default `vgs` / `zfs list` capacity line.
const DEFAULT_CAPACITY_OUTPUT: &str = "  10485760.00,5242880.00\n";

/// In-memory stand-in for the LVM and ZFS command-line tools.
///
/// It understands the argv the backend variants produce, keeps volumes,
/// thin pools, ZFS snapshots and clone origins in memory, and records every
/// invocation. Useful for:
/// - Unit and integration testing of the retry / rollback logic
/// - Development without volume groups or zpools at hand
///
/// Objects are keyed by their full tool name: `VG/NAME` for LVM, `POOL/NAME`
/// for ZFS datasets and `POOL/NAME@SNAP` for ZFS snapshots. Sizes are KiB.
pub struct MockTool {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    volumes: BTreeMap<String, u64>,
    snapshots: BTreeSet<String>,
    origins: BTreeMap<String, String>,
    calls: Vec<(Instant, Vec<String>)>,
    capacity_output: String,
    ignore_all_removals: bool,
    ignored_removals: BTreeSet<String>,
    ignore_all_creates: bool,
    ignored_creates: BTreeSet<String>,
    probe_status: Option<i32>,
    launch_fails: bool,
}

impl MockTool {
    /// Create an empty simulated system.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                capacity_output: DEFAULT_CAPACITY_OUTPUT.to_string(),
                ..MockState::default()
            }),
        }
    }
    
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    
    /// Every removal exits non-zero and leaves the object in place.
    pub fn fail_removals(&self) {
        self.lock().ignore_all_removals = true;
    }
    
    /// Removing `key` exits non-zero and leaves it in place.
    pub fn fail_removal_of(&self, key: &str) {
        self.lock().ignored_removals.insert(key.to_string());
    }
    
    /// Every creation exits non-zero without creating anything.
    pub fn fail_creates(&self) {
        self.lock().ignore_all_creates = true;
    }
    
    /// Creating `key` exits non-zero without creating it.
    pub fn fail_create_of(&self, key: &str) {
        self.lock().ignored_creates.insert(key.to_string());
    }
    
    /// Existence queries exit with `status` instead of answering.
    pub fn fail_probes(&self, status: i32) {
        self.lock().probe_status = Some(status);
    }
    
    /// No binary can be launched.
    pub fn fail_launch(&self) {
        self.lock().launch_fails = true;
    }
    
    /// Drop every injected failure.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.ignore_all_removals = false;
        state.ignored_removals.clear();
        state.ignore_all_creates = false;
        state.ignored_creates.clear();
        state.probe_status = None;
        state.launch_fails = false;
    }
    
    /// Output of the next capacity queries.
    pub fn set_capacity_output(&self, output: &str) {
        self.lock().capacity_output = output.to_string();
    }
    
    /// Place an object on the system behind the backend's back.
    pub fn insert_volume(&self, key: &str, size_kib: u64) {
        self.lock().volumes.insert(key.to_string(), size_kib);
    }
    
    /// Remove an object behind the backend's back.
    pub fn remove_volume(&self, key: &str) {
        self.lock().volumes.remove(key);
    }
    
    pub fn exists(&self, key: &str) -> bool {
        let state = self.lock();
        state.volumes.contains_key(key) || state.snapshots.contains(key)
    }
    
    pub fn volume_size(&self, key: &str) -> Option<u64> {
        self.lock().volumes.get(key).copied()
    }
    
    /// Every recorded argv, oldest first.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.iter().map(|(_, argv)| argv.clone()).collect()
    }
    
    /// Timestamps of the calls matching `pattern`, see [`Self::count_calls`].
    pub fn call_times(&self, pattern: &str) -> Vec<Instant> {
        self.lock()
            .calls
            .iter()
            .filter(|(_, argv)| matches_pattern(argv, pattern))
            .map(|(at, _)| *at)
            .collect()
    }
    
    /// Number of calls matching `pattern`: a binary name (`"lvremove"`) or a
    /// binary and subcommand (`"zfs destroy"`).
    pub fn count_calls(&self, pattern: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|(_, argv)| matches_pattern(argv, pattern))
            .count()
    }
    
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Default for MockTool {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockTool {
    fn run(&self, argv: &[String], _capture_output: bool) -> std::io::Result<CommandOutput> {
        let mut state = self.lock();
        state.calls.push((Instant::now(), argv.to_vec()));
        
        if state.launch_fails {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: not found", argv.first().map(String::as_str).unwrap_or_default()),
            ));
        }
        
        let program = argv.first().map(|p| basename(p)).unwrap_or_default();
        let args = argv.get(1..).unwrap_or_default();
        let output = match program {
            "zfs" => state.zfs(args),
            _ => state.lvm(program, args),
        };
        
        debug!(command = ?argv, status = output.status, "Mock command");
        Ok(output)
    }
}

impl MockState {
    fn lvm(&mut self, program: &str, args: &[String]) -> CommandOutput {
        let flags = Flags::parse(args);
        let target = args.last().cloned().unwrap_or_default();
        let fail = || CommandOutput::new(LVM_NOT_FOUND_STATUS, "");
        
        match program {
            "lvs" => {
                if let Some(status) = self.probe_status {
                    return CommandOutput::new(status, "");
                }
                match self.volumes.contains_key(&target) {
                    true => CommandOutput::new(0, format!("  {}\n", leaf(&target))),
                    false => fail(),
                }
            }
            "vgs" => CommandOutput::new(0, self.capacity_output.clone()),
            "lvcreate" => {
                let vg = flags.positional.split('/').next().unwrap_or_default().to_string();
                let (key, size) = if flags.has("-T") {
                    (flags.positional.clone(), flags.size("-L"))
                } else if flags.has("-s") {
                    let Some(origin_size) = self.volumes.get(&flags.positional).copied() else {
                        return fail();
                    };
                    let size = flags.size("-L").unwrap_or(origin_size);
                    (format!("{}/{}", vg, flags.value("-n")), Some(size))
                } else if let Some(pool) = flags.get("--thinpool") {
                    if !self.volumes.contains_key(&format!("{}/{}", vg, pool)) {
                        return fail();
                    }
                    (format!("{}/{}", vg, flags.value("-n")), flags.size("-V"))
                } else {
                    (format!("{}/{}", vg, flags.value("-n")), flags.size("-L"))
                };
                
                match size {
                    Some(size) if self.may_create(&key) && !self.volumes.contains_key(&key) => {
                        self.volumes.insert(key, size);
                        CommandOutput::new(0, "")
                    }
                    _ => fail(),
                }
            }
            "lvremove" => {
                if self.removal_ignored(&target) || self.volumes.remove(&target).is_none() {
                    return fail();
                }
                CommandOutput::new(0, "")
            }
            "lvextend" => match (flags.size("-L"), self.volumes.get_mut(&target)) {
                (Some(size), Some(current)) => {
                    *current = size;
                    CommandOutput::new(0, "")
                }
                _ => fail(),
            },
            "lvchange" => match self.volumes.contains_key(&target) {
                true => CommandOutput::new(0, ""),
                false => fail(),
            },
            _ => CommandOutput::new(127, ""),
        }
    }
    
    fn zfs(&mut self, args: &[String]) -> CommandOutput {
        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        let rest = args.get(1..).unwrap_or_default();
        let flags = Flags::parse(rest);
        let target = rest.last().cloned().unwrap_or_default();
        let fail = || CommandOutput::new(ZFS_NOT_FOUND_STATUS, "");
        
        match subcommand {
            "list" if flags.get("-o") == Some("name") => {
                if let Some(status) = self.probe_status {
                    return CommandOutput::new(status, "");
                }
                match self.volumes.contains_key(&target) {
                    true => CommandOutput::new(0, format!("{}\n", target)),
                    false => fail(),
                }
            }
            "list" => CommandOutput::new(0, self.capacity_output.clone()),
            "create" => match flags.size("-V") {
                Some(size) if self.may_create(&target) && !self.volumes.contains_key(&target) => {
                    self.volumes.insert(target, size);
                    CommandOutput::new(0, "")
                }
                _ => fail(),
            },
            "destroy" => {
                if self.removal_ignored(&target) {
                    return fail();
                }
                if target.contains('@') {
                    if self.origins.values().any(|o| *o == target) {
                        return fail();
                    }
                    return match self.snapshots.remove(&target) {
                        true => CommandOutput::new(0, ""),
                        false => fail(),
                    };
                }
                if !self.volumes.contains_key(&target) {
                    return fail();
                }
                let prefix = format!("{}@", target);
                let owned: Vec<String> = self
                    .snapshots
                    .iter()
                    .filter(|s| s.starts_with(&prefix))
                    .cloned()
                    .collect();
                let has_clones = self.origins.values().any(|o| owned.contains(o));
                if has_clones || (!owned.is_empty() && !flags.has("-r")) {
                    return fail();
                }
                for snap in owned {
                    self.snapshots.remove(&snap);
                }
                self.volumes.remove(&target);
                self.origins.remove(&target);
                CommandOutput::new(0, "")
            }
            "snapshot" => {
                let dataset = target.split('@').next().unwrap_or_default();
                if !self.volumes.contains_key(dataset) || !self.may_create(&target) {
                    return fail();
                }
                match self.snapshots.insert(target) {
                    true => CommandOutput::new(0, ""),
                    false => fail(),
                }
            }
            "clone" => {
                let origin = rest.first().cloned().unwrap_or_default();
                let dataset = origin.split('@').next().unwrap_or_default();
                let Some(size) = self.volumes.get(dataset).copied() else {
                    return fail();
                };
                if !self.snapshots.contains(&origin)
                    || self.volumes.contains_key(&target)
                    || !self.may_create(&target)
                {
                    return fail();
                }
                self.volumes.insert(target.clone(), size);
                self.origins.insert(target, origin);
                CommandOutput::new(0, "")
            }
            "set" => {
                let size = rest
                    .first()
                    .and_then(|s| s.strip_prefix("volsize="))
                    .and_then(parse_size);
                match (size, self.volumes.get_mut(&target)) {
                    (Some(size), Some(current)) => {
                        *current = size;
                        CommandOutput::new(0, "")
                    }
                    _ => fail(),
                }
            }
            "get" => {
                let property = rest.get(rest.len().saturating_sub(2)).map(String::as_str);
                if target.contains('@') {
                    if !self.snapshots.contains(&target) || property != Some("clones") {
                        return fail();
                    }
                    let clones: Vec<&str> = self
                        .origins
                        .iter()
                        .filter(|(_, origin)| **origin == target)
                        .map(|(clone, _)| clone.as_str())
                        .collect();
                    let value = if clones.is_empty() { "-".to_string() } else { clones.join(",") };
                    return CommandOutput::new(0, format!("{}\n", value));
                }
                if !self.volumes.contains_key(&target) {
                    return fail();
                }
                match property {
                    Some("origin") => {
                        let origin = self.origins.get(&target).cloned().unwrap_or_else(|| "-".to_string());
                        CommandOutput::new(0, format!("{}\n", origin))
                    }
                    Some("volsize") => {
                        let bytes = self.volumes.get(&target).copied().unwrap_or_default() * 1024;
                        CommandOutput::new(0, format!("{}\n", bytes))
                    }
                    _ => fail(),
                }
            }
            _ => CommandOutput::new(2, ""),
        }
    }
    
    fn may_create(&self, key: &str) -> bool {
        !self.ignore_all_creates && !self.ignored_creates.contains(key)
    }
    
    fn removal_ignored(&self, key: &str) -> bool {
        self.ignore_all_removals || self.ignored_removals.contains(key)
    }
}

/// Minimal option parser: `-x VALUE` pairs, bare switches and the last
/// positional argument.
struct Flags {
    values: BTreeMap<String, String>,
    switches: BTreeSet<String>,
    positional: String,
}

impl Flags {
    const WITH_VALUE: [&'static str; 8] = ["-n", "-L", "-V", "--thinpool", "-o", "--options", "--units", "--separator"];
    
    fn parse(args: &[String]) -> Self {
        let mut values = BTreeMap::new();
        let mut switches = BTreeSet::new();
        let mut positional = String::new();
        let mut iter = args.iter();
        
        while let Some(arg) = iter.next() {
            if Self::WITH_VALUE.contains(&arg.as_str()) {
                if let Some(value) = iter.next() {
                    values.insert(arg.clone(), value.clone());
                }
            } else if arg.starts_with('-') {
                switches.insert(arg.clone());
            } else {
                positional = arg.clone();
            }
        }
        
        Self { values, switches, positional }
    }
    
    fn has(&self, switch: &str) -> bool {
        self.switches.contains(switch)
    }
    
    fn get(&self, flag: &str) -> Option<&str> {
        self.values.get(flag).map(String::as_str)
    }
    
    fn value(&self, flag: &str) -> String {
        self.get(flag).unwrap_or_default().to_string()
    }
    
    fn size(&self, flag: &str) -> Option<u64> {
        self.get(flag).and_then(parse_size)
    }
}

/// `4096k` -> 4096
fn parse_size(raw: &str) -> Option<u64> {
    raw.trim_end_matches(|c| c == 'k' || c == 'K').parse().ok()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn leaf(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn matches_pattern(argv: &[String], pattern: &str) -> bool {
    let mut words = pattern.split_whitespace();
    let program = words.next().unwrap_or_default();
    if argv.first().map(|p| basename(p)) != Some(program) {
        return false;
    }
    match words.next() {
        Some(sub) => argv.get(1).map(String::as_str) == Some(sub),
        None => true,
    }
}
