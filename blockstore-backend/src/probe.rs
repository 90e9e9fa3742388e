//! Existence and capacity probes.

use tracing::{debug, warn};

use crate::command::Tool;
use crate::error::{BackendError, Result};

/// Ask the tool whether exactly one named object exists.
///
/// Only the first stdout line is consulted and compared against `expected`.
/// `not_found_status` is the tool's regular "no such object" exit code and
/// yields `false`; any other non-zero exit code is a [`BackendError::CheckFailed`]
/// and must never be read as "absent".
pub fn probe_exists(
    tool: &Tool,
    argv: &[String],
    expected: &str,
    not_found_status: i32,
) -> Result<bool> {
    let output = match tool.exec(argv) {
        Ok(output) => output,
        Err(BackendError::Launch { command, source }) => {
            return Err(BackendError::CheckFailed(format!(
                "existence check for {} could not launch {}: {}",
                expected, command, source
            )));
        }
        Err(e) => return Err(e),
    };
    
    if output.status == not_found_status {
        debug!(backend = %tool.backend(), object = %expected, "Object does not exist");
        return Ok(false);
    }
    if !output.success() {
        warn!(backend = %tool.backend(), object = %expected, status = output.status, "Existence check failed");
        return Err(BackendError::CheckFailed(format!(
            "existence check for {} exited with status {}",
            expected, output.status
        )));
    }
    
    let exists = output.first_line() == Some(expected);
    debug!(backend = %tool.backend(), object = %expected, exists, "Existence check");
    Ok(exists)
}

/// Split a line of comma- or whitespace-separated numbers.
///
/// Fractional parts are discarded before integer parsing. Any field that is
/// not a number fails the whole line.
pub fn parse_numeric_fields(line: &str) -> Option<Vec<u64>> {
    let fields: Vec<&str> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() {
        return None;
    }
    
    fields
        .into_iter()
        .map(|field| {
            let integral = match field.find('.') {
                Some(idx) => &field[..idx],
                None => field,
            };
            integral.parse::<u64>().ok()
        })
        .collect()
}

/// Query pool capacity and return `(total_kib, free_kib)`.
///
/// `convert` maps the numeric fields of the first output line to the two
/// values; both are produced together or the probe fails.
pub fn probe_capacity<F>(tool: &Tool, argv: &[String], convert: F) -> Result<(u64, u64)>
where
    F: Fn(&[u64]) -> Option<(u64, u64)>,
{
    let output = match tool.exec(argv) {
        Ok(output) => output,
        Err(BackendError::Launch { command, source }) => {
            return Err(BackendError::CheckFailed(format!(
                "capacity query could not launch {}: {}",
                command, source
            )));
        }
        Err(e) => return Err(e),
    };
    
    if !output.success() {
        return Err(BackendError::CheckFailed(format!(
            "capacity query exited with status {}",
            output.status
        )));
    }
    
    let line = output
        .first_line()
        .ok_or_else(|| BackendError::CheckFailed("capacity query produced no output".into()))?;
    
    parse_numeric_fields(line)
        .and_then(|fields| convert(&fields))
        .ok_or_else(|| BackendError::CheckFailed(format!("unparsable capacity output: {:?}", line)))
}
