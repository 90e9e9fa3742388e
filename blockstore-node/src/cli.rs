//! Command-line argument parsing.

use clap::{Parser, Subcommand};

/// blockstore - backing volume management for replicated block devices
#[derive(Parser, Debug)]
#[command(name = "blockstore")]
#[command(about = "blockstore - backing volume management for replicated block devices")]
#[command(version)]
pub struct Args {
    /// Path to the backend option file (YAML, defaults used if not found)
    #[arg(short, long, env = "BLOCKSTORE_CONFIG")]
    pub config: Option<String>,
    
    /// Backend variant (lvm, thinlv, zvol, thinzvol)
    #[arg(short, long, default_value = "lvm", env = "BLOCKSTORE_BACKEND")]
    pub backend: String,
    
    /// Override a backend option, e.g. `-o volume-group=vg0`
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub options: Vec<String>,
    
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
    
    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    pub log_format: String,
    
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create volume SLOT of RESOURCE
    Create {
        resource: String,
        slot: u32,
        /// Size in KiB
        size_kib: u64,
    },
    
    /// Remove a managed volume
    Remove { volume: String },
    
    /// Grow a managed volume
    Extend {
        volume: String,
        /// New size in KiB
        size_kib: u64,
    },
    
    /// Snapshot a managed volume
    Snapshot {
        source: String,
        snapshot: String,
        slot: u32,
    },
    
    /// Create volume SLOT of RESOURCE from a snapshot
    Restore {
        snapshot: String,
        resource: String,
        slot: u32,
    },
    
    /// Remove a managed snapshot
    RemoveSnapshot { snapshot: String },
    
    /// Activate a volume
    Up { volume: String },
    
    /// Deactivate a volume
    Down { volume: String },
    
    /// Show total and free capacity
    Capacity,
    
    /// Show one managed volume
    Show { volume: String },
    
    /// List managed volumes, or pools with --pools
    List {
        #[arg(long)]
        pools: bool,
    },
    
    /// Remove empty pools left behind by failed removals
    Reconcile,
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_parse_create() {
        let args = Args::try_parse_from([
            "blockstore", "--backend", "thinlv", "-o", "volume-group=vg0", "create", "res1", "0", "1048576",
        ])
        .unwrap();
        assert_eq!(args.backend, "thinlv");
        assert_eq!(args.options, vec!["volume-group=vg0"]);
        assert_eq!(
            args.command,
            Command::Create {
                resource: "res1".into(),
                slot: 0,
                size_kib: 1048576
            }
        );
    }
    
    #[test]
    fn test_parse_list_pools() {
        let args = Args::try_parse_from(["blockstore", "list", "--pools"]).unwrap();
        assert_eq!(args.command, Command::List { pools: true });
        assert_eq!(args.log_format, "text");
    }
}
