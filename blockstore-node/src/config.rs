//! Backend option loading.
//!
//! The option file is a flat YAML mapping of option keys to scalars:
//!
//! ```yaml
//! volume-group: vg0
//! tool-path: /usr/sbin
//! pool-ratio: 150
//! ```

use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::cli::Args;

/// Option file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blockstore/backend.yaml";

/// Load an option file into a key -> value map.
pub fn load<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    
    if !path.exists() {
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }
    
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    
    parse(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse option file content. Scalars are stringified, nulls skipped.
pub fn parse(content: &str) -> Result<HashMap<String, String>> {
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    
    let raw: BTreeMap<String, Value> = serde_yaml::from_str(content)?;
    let mut options = HashMap::new();
    
    for (key, value) in raw {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => continue,
            _ => bail!("option {} must be a scalar", key),
        };
        options.insert(key, value);
    }
    
    Ok(options)
}

/// Parse `KEY=VALUE` overrides.
pub fn parse_overrides(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Option override must look like KEY=VALUE: {}", pair))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Option map for this invocation: file options with CLI overrides on top.
pub fn resolve(args: &Args) -> Result<HashMap<String, String>> {
    let mut options = match &args.config {
        Some(path) => {
            let options = load(path)?;
            info!(config_path = %path, "Configuration loaded");
            options
        }
        None => match load(DEFAULT_CONFIG_PATH) {
            Ok(options) => {
                info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
                options
            }
            Err(_) => {
                info!("No config file found, using defaults");
                HashMap::new()
            }
        },
    };
    
    options.extend(parse_overrides(&args.options)?);
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_parse_scalars() {
        let options = parse("volume-group: vg0\npool-ratio: 150\nverbose: true\nunused: ~\n").unwrap();
        assert_eq!(options.get("volume-group").map(String::as_str), Some("vg0"));
        assert_eq!(options.get("pool-ratio").map(String::as_str), Some("150"));
        assert_eq!(options.get("verbose").map(String::as_str), Some("true"));
        assert!(!options.contains_key("unused"));
    }
    
    #[test]
    fn test_parse_rejects_nested_values() {
        assert!(parse("volume-group:\n  name: vg0\n").is_err());
        assert!(parse("").unwrap().is_empty());
    }
    
    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.yaml");
        std::fs::write(&path, "tool-path: /usr/sbin\n").unwrap();
        
        let options = load(&path).unwrap();
        assert_eq!(options.get("tool-path").map(String::as_str), Some("/usr/sbin"));
        assert!(load(dir.path().join("missing.yaml")).is_err());
    }
    
    #[test]
    fn test_overrides() {
        let options = parse_overrides(&["volume-group = vg1".to_string()]).unwrap();
        assert_eq!(options.get("volume-group").map(String::as_str), Some("vg1"));
        assert!(parse_overrides(&["volume-group".to_string()]).is_err());
    }
}
