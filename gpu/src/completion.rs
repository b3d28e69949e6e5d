//! Completion tokens: the host's view of one in-flight dispatch.
//!
//! Every submission produces a [`CompletionToken`] for the host and a
//! [`CompletionSignal`] for the device. Only the signal can move the token
//! out of `Pending`, and it can do so exactly once:
//!
//! ```text
//!            complete()
//! Pending ───────────────▶ Completed
//!    │
//!    │  fail(reason) / signal dropped
//!    └───────────────────▶ Failed
//! ```
//!
//! Terminal states are sticky; polling a finished token always returns the
//! same answer.

use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::buffer::Lease;
use crate::error::{DispatchError, Result};

/// State of a submitted dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStatus {
    Pending,
    Completed,
    Failed(DeviceFault),
}

/// Fault reported by the device for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub submission: u64,
    pub reason: String,
}

impl TokenStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenStatus::Pending)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TokenStatus::Completed)
    }

    /// `Ok(())` for `Completed`; a `Failed` token becomes
    /// [`DispatchError::DeviceExecutionFailure`].
    pub fn into_result(self) -> Result<()> {
        match self {
            TokenStatus::Completed => Ok(()),
            TokenStatus::Failed(fault) => Err(DispatchError::DeviceExecutionFailure {
                submission: fault.submission,
                reason: fault.reason,
            }),
            TokenStatus::Pending => Err(DispatchError::Submission(
                "dispatch has not reached a terminal state".to_string(),
            )),
        }
    }
}

struct Shared {
    status: Mutex<TokenStatus>,
    settled: Condvar,
}

/// Host handle on one submitted dispatch.
#[derive(Clone)]
pub struct CompletionToken {
    shared: Arc<Shared>,
    submission: u64,
}

impl CompletionToken {
    /// Monotonic id of the submission this token tracks.
    pub fn submission(&self) -> u64 {
        self.submission
    }

    /// Current state without blocking.
    pub fn status(&self) -> TokenStatus {
        self.shared.status.lock().clone()
    }

    /// Block on the token's condition variable until it is terminal.
    #[cfg(test)]
    pub(crate) fn block_until_settled(&self) -> TokenStatus {
        let mut status = self.shared.status.lock();
        while !status.is_terminal() {
            self.shared.settled.wait(&mut status);
        }
        status.clone()
    }

    /// Block on the token's condition variable for at most `timeout` and
    /// return whatever the state is then.
    pub(crate) fn block_for(&self, timeout: Duration) -> TokenStatus {
        let mut status = self.shared.status.lock();
        if !status.is_terminal() {
            self.shared.settled.wait_for(&mut status, timeout);
        }
        status.clone()
    }
}

impl std::fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionToken")
            .field("submission", &self.submission)
            .field("status", &self.status())
            .finish()
    }
}

/// Device-side half of a token. Consumed by firing it.
///
/// Carries the leases of every buffer bound into the dispatch; they are
/// released before the token is published as terminal, so a host that
/// observes `Completed` can immediately touch the buffers.
pub struct CompletionSignal {
    shared: Arc<Shared>,
    submission: u64,
    leases: Vec<Lease>,
    fired: bool,
}

impl CompletionSignal {
    pub fn submission(&self) -> u64 {
        self.submission
    }

    /// The dispatch finished and its writes are visible to the host.
    pub fn complete(mut self) {
        self.settle(TokenStatus::Completed);
    }

    /// The dispatch faulted; buffers it wrote are not trustworthy.
    pub fn fail(mut self, reason: impl Into<String>) {
        let fault = DeviceFault {
            submission: self.submission,
            reason: reason.into(),
        };
        self.settle(TokenStatus::Failed(fault));
    }

    fn settle(&mut self, outcome: TokenStatus) {
        if self.fired {
            return;
        }
        self.fired = true;
        self.leases.clear();

        let mut status = self.shared.status.lock();
        if status.is_terminal() {
            return;
        }
        match &outcome {
            TokenStatus::Failed(fault) => {
                warn!("submission {} failed: {}", self.submission, fault.reason)
            }
            _ => trace!("submission {} completed", self.submission),
        }
        *status = outcome;
        self.shared.settled.notify_all();
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if !self.fired {
            self.settle(TokenStatus::Failed(DeviceFault {
                submission: self.submission,
                reason: "completion signal dropped before the device reported".to_string(),
            }));
        }
    }
}

/// Create the linked token/signal pair for one submission.
pub(crate) fn completion_pair(
    submission: u64,
    leases: Vec<Lease>,
) -> (CompletionToken, CompletionSignal) {
    let shared = Arc::new(Shared {
        status: Mutex::new(TokenStatus::Pending),
        settled: Condvar::new(),
    });
    let token = CompletionToken {
        shared: Arc::clone(&shared),
        submission,
    };
    let signal = CompletionSignal {
        shared,
        submission,
        leases,
        fired: false,
    };
    (token, signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceBuffer;
    use std::thread;

    #[test]
    fn test_starts_pending() {
        let (token, _signal) = completion_pair(1, Vec::new());
        assert_eq!(token.status(), TokenStatus::Pending);
        assert_eq!(token.submission(), 1);
    }

    #[test]
    fn test_complete_is_sticky() {
        let (token, signal) = completion_pair(2, Vec::new());
        signal.complete();
        for _ in 0..5 {
            assert_eq!(token.status(), TokenStatus::Completed);
        }
    }

    #[test]
    fn test_fail_carries_reason() {
        let (token, signal) = completion_pair(3, Vec::new());
        signal.fail("bad access");
        match token.status() {
            TokenStatus::Failed(fault) => {
                assert_eq!(fault.submission, 3);
                assert_eq!(fault.reason, "bad access");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(
            token.status().into_result(),
            Err(DispatchError::DeviceExecutionFailure { submission: 3, .. })
        ));
    }

    #[test]
    fn test_dropped_signal_fails_token() {
        let (token, signal) = completion_pair(4, Vec::new());
        drop(signal);
        assert!(matches!(token.status(), TokenStatus::Failed(_)));
    }

    #[test]
    fn test_leases_released_before_publish() {
        let buffer = DeviceBuffer::new((), 4, 4);
        let (token, signal) = completion_pair(5, vec![buffer.lease()]);
        assert!(buffer.is_leased());
        signal.complete();
        assert!(token.status().is_completed());
        assert!(!buffer.is_leased());
    }

    #[test]
    fn test_block_until_settled_wakes_on_other_thread() {
        let (token, signal) = completion_pair(6, Vec::new());
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signal.complete();
        });
        assert_eq!(token.block_until_settled(), TokenStatus::Completed);
        worker.join().unwrap();
    }

    #[test]
    fn test_block_for_times_out_pending() {
        let (token, _signal) = completion_pair(7, Vec::new());
        assert_eq!(token.block_for(Duration::from_millis(5)), TokenStatus::Pending);
    }
}
