//! Bounded exponential backoff for transient I/O (spec.md §4.5, §7:
//! "3 attempts, 200 ms base").

use std::thread;
use std::time::Duration;

use crate::constants::{RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS};
use crate::error::VaultError;

/// Retries `op` up to `RETRY_ATTEMPTS` times with `RETRY_BASE_DELAY_MS * 2^n`
/// backoff between attempts, but only while the returned error reports
/// itself as transient (`VaultError::is_transient`). Non-transient errors
/// are returned immediately on the first failure.
pub fn with_backoff<T>(mut op: impl FnMut() -> Result<T, VaultError>) -> Result<T, VaultError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(err) if err.is_transient() && attempt + 1 < RETRY_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY_MS * (1u64 << attempt);
                log::warn!(
                    "transient error on attempt {}/{}: {}, retrying in {}ms",
                    attempt + 1,
                    RETRY_ATTEMPTS,
                    err,
                    delay
                );
                thread::sleep(Duration::from_millis(delay));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_transient_until_success() {
        let attempts = Cell::new(0);
        let result = with_backoff(|| {
            let n = attempts.get() + 1;
            attempts.set(n);
            if n < 3 {
                Err(VaultError::transient("not yet"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn gives_up_after_budget_exhausted() {
        let attempts = Cell::new(0);
        let result: Result<(), VaultError> = with_backoff(|| {
            attempts.set(attempts.get() + 1);
            Err(VaultError::transient("always fails"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), RETRY_ATTEMPTS);
    }

    #[test]
    fn does_not_retry_non_transient() {
        let attempts = Cell::new(0);
        let result: Result<(), VaultError> = with_backoff(|| {
            attempts.set(attempts.get() + 1);
            Err(VaultError::readonly("write"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
