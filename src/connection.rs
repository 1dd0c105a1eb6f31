//! # Connection State Module
//!
//! Tracks whether the radio transport is ready for application traffic.
//!
//! ## State Machine
//!
//! ```text
//! Uninitialized --bring-up ok--> Joining --join ok--> Connected
//!       |                           |
//!       +---- retries exhausted ----+--> Error
//! ```
//!
//! Transitions only move forward. `Connected` and `Error` are terminal. `Error`
//! is only reachable when a bounded [`RetryPolicy`] is configured; with the
//! default unbounded policies the link keeps retrying forever.
//!
//! The current state lives in a [`ConnectionStatus`] cell written by the link
//! runner and read by the application without blocking.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;

/// Readiness of the radio link
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum ConnectionState {
    /// The worker has not brought the transport up yet
    Uninitialized,
    /// The transport is up and the network join is in progress
    Joining,
    /// The network join was accepted; uplinks and downlinks flow
    Connected,
    /// Reserved. Entered only when a bounded retry policy gives up.
    Error,
}

impl ConnectionState {
    /// Returns true if the application traffic can reach the network
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    fn permits(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Uninitialized, ConnectionState::Joining)
                | (ConnectionState::Joining, ConnectionState::Connected)
                | (ConnectionState::Uninitialized, ConnectionState::Error)
                | (ConnectionState::Joining, ConnectionState::Error)
        )
    }
}

/// Forward-only state cell shared between the runner and the application
pub(crate) struct ConnectionStatus {
    state: Mutex<CriticalSectionRawMutex, Cell<ConnectionState>>,
}

impl ConnectionStatus {
    pub(crate) const fn new() -> Self {
        ConnectionStatus {
            state: Mutex::new(Cell::new(ConnectionState::Uninitialized)),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.state.lock(|state| state.get())
    }

    /// Moves to `next` if the transition is allowed. Returns false and keeps the
    /// current state otherwise.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.state.lock(|state| {
            if state.get().permits(next) {
                state.set(next);
                true
            } else {
                false
            }
        })
    }
}

/// Retry behaviour of the bring-up and join loops
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RetryPolicy {
    /// Pause after each failed attempt
    pub backoff: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const fn unbounded(backoff: Duration) -> Self {
        RetryPolicy { backoff, max_attempts: None }
    }

    pub const fn bounded(backoff: Duration, max_attempts: u32) -> Self {
        RetryPolicy {
            backoff,
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether another attempt may follow `attempts_made` failed ones
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempts_made < max,
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let status = ConnectionStatus::new();
        assert_eq!(status.get(), ConnectionState::Uninitialized);
        assert!(!status.get().is_connected());
    }

    #[test]
    fn advances_forward_only() {
        let status = ConnectionStatus::new();
        assert!(!status.advance(ConnectionState::Connected));
        assert_eq!(status.get(), ConnectionState::Uninitialized);

        assert!(status.advance(ConnectionState::Joining));
        assert!(!status.advance(ConnectionState::Uninitialized));
        assert!(!status.advance(ConnectionState::Joining));
        assert_eq!(status.get(), ConnectionState::Joining);

        assert!(status.advance(ConnectionState::Connected));
        assert!(status.get().is_connected());
    }

    #[test]
    fn connected_is_terminal() {
        let status = ConnectionStatus::new();
        status.advance(ConnectionState::Joining);
        status.advance(ConnectionState::Connected);
        for next in [
            ConnectionState::Uninitialized,
            ConnectionState::Joining,
            ConnectionState::Connected,
            ConnectionState::Error,
        ] {
            assert!(!status.advance(next));
            assert_eq!(status.get(), ConnectionState::Connected);
        }
    }

    #[test]
    fn error_is_terminal() {
        let status = ConnectionStatus::new();
        assert!(status.advance(ConnectionState::Error));
        assert!(!status.advance(ConnectionState::Joining));
        assert!(!status.advance(ConnectionState::Connected));
        assert_eq!(status.get(), ConnectionState::Error);
    }

    #[test]
    fn unbounded_policy_always_retries() {
        let policy = RetryPolicy::unbounded(Duration::from_secs(1));
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(u32::MAX));
    }

    #[test]
    fn bounded_policy_stops_at_limit() {
        let policy = RetryPolicy::bounded(Duration::from_secs(2), 3);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
    }
}
