use tracing::{debug, warn};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { attempts: u32 },
    /// Every attempt failed with a transient error; the caller drops the file.
    Exhausted { attempts: u32 },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

/// Only [`FetchError::Transport`] is retried; any other error is returned as is.
pub fn retry_transfer<F>(
    max_attempts: u32,
    label: &str,
    mut action: F,
) -> Result<TransferOutcome, FetchError>
where
    F: FnMut() -> Result<(), FetchError>,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match action() {
            Ok(()) => {
                debug!(file = label, attempt, "transfer completed");
                return Ok(TransferOutcome::Completed { attempts: attempt });
            }
            Err(err) if err.is_transient() => {
                warn!(file = label, attempt, max_attempts, error = %err, "transfer attempt failed");
            }
            Err(err) => return Err(err),
        }
    }
    warn!(file = label, attempts = max_attempts, "transfer retries exhausted");
    Ok(TransferOutcome::Exhausted {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let outcome = retry_transfer(3, "a.nc", || {
            calls += 1;
            if calls < 3 {
                Err(FetchError::Transport("reset".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(outcome, TransferOutcome::Completed { attempts: 3 });
    }

    #[test]
    fn exhausts_silently() {
        let mut calls = 0;
        let outcome = retry_transfer(2, "a.nc", || {
            calls += 1;
            Err(FetchError::Transport("timeout".to_string()))
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(outcome, TransferOutcome::Exhausted { attempts: 2 });
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let outcome = retry_transfer(0, "a.nc", || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 1);
        assert!(outcome.is_completed());
    }

    #[test]
    fn fatal_errors_propagate_immediately() {
        let mut calls = 0;
        let err = retry_transfer(5, "a.nc", || {
            calls += 1;
            Err(FetchError::DataNotAvailable("gone".to_string()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert_matches!(err, FetchError::DataNotAvailable(_));
    }
}
