//! Bounded retry around "invoke, then probe" steps.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

/// Attempts per create / remove / snapshot step.
pub const MAX_RETRIES: u32 = 2;

/// Pause between two attempts. The first attempt runs immediately.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_RETRIES,
            delay: RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
    
    /// Run `step` until it confirms the expected system state.
    ///
    /// `step` returns `Ok(true)` once the result is confirmed and `Ok(false)`
    /// when it is not (yet). Launch and probe failures end the loop at once;
    /// any other error counts as an unconfirmed attempt. Returns `Ok(false)`
    /// when every attempt went by unconfirmed.
    pub fn run<F>(&self, action: &str, object: &str, mut step: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        let attempts = self.attempts.max(1);
        
        for attempt in 1..=attempts {
            if attempt > 1 {
                thread::sleep(self.delay);
            }
            
            match step() {
                Ok(true) => {
                    debug!(action, object, attempt, "Confirmed");
                    return Ok(true);
                }
                Ok(false) => {
                    warn!(action, object, attempt, attempts, "Attempt not confirmed");
                }
                Err(e) if e.is_abort() => return Err(e),
                Err(e) => {
                    warn!(action, object, attempt, attempts, error = %e, "Attempt failed");
                }
            }
        }
        
        Ok(false)
    }
}

/// Let a failed tool invocation fall through to the confirming probe.
///
/// Launch and probe failures still propagate.
pub(crate) fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_abort() => {
            debug!(error = %e, "Command reported failure, probing anyway");
            Ok(())
        }
        other => other,
    }
}
