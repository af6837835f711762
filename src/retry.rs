//! Bounded retry for transient I/O
//!
//! Only I/O-level failures are retried; parse and format errors are
//! deterministic and callers must not route them through here.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::debug;

/// Run `op` up to `attempts` times, sleeping `backoff` between tries
pub fn with_retry<T, F>(attempts: u32, backoff: Duration, mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                last_err = Some(e);
                if attempt < attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("retry with zero attempts")))
}
