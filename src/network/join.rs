//! A single bounded join attempt.
//!
//! Replaces "begin, then spin until connected or timed out" with a value that
//! is polled once per scheduler tick. The deadline is measured from the
//! moment the join was started.

use super::{JoinStatus, NetworkError, NetworkProvider};
use crate::config::Credentials;

/// Result of polling a [`JoinAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPoll {
    /// Not resolved yet; poll again next tick.
    Pending,
    /// The station is connected.
    Connected,
    /// The deadline passed without a connection.
    TimedOut,
}

/// An in-flight join: target credentials, start time and timeout.
///
/// There is no cancellation: an attempt always ends connected or timed out.
#[derive(Debug)]
pub struct JoinAttempt {
    credentials: Credentials,
    started_ms: u64,
    timeout_ms: u64,
}

impl JoinAttempt {
    /// Ask the driver to join and return the attempt tracking it.
    pub fn start<N: NetworkProvider + ?Sized>(
        network: &mut N,
        credentials: Credentials,
        now_ms: u64,
        timeout_ms: u64,
    ) -> Result<Self, NetworkError> {
        network.begin_join(&credentials)?;
        Ok(Self {
            credentials,
            started_ms: now_ms,
            timeout_ms,
        })
    }

    /// Credentials being tried.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// When the attempt started.
    pub fn started_ms(&self) -> u64 {
        self.started_ms
    }

    /// Timeout of the attempt.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Check the driver once.
    ///
    /// A connection observed exactly at the deadline still counts.
    pub fn poll<N: NetworkProvider + ?Sized>(&self, network: &mut N, now_ms: u64) -> JoinPoll {
        if network.join_status() == JoinStatus::Connected {
            return JoinPoll::Connected;
        }
        if now_ms.saturating_sub(self.started_ms) >= self.timeout_ms {
            JoinPoll::TimedOut
        } else {
            JoinPoll::Pending
        }
    }

    /// Consume the attempt, returning the credentials.
    pub fn into_credentials(self) -> Credentials {
        self.credentials
    }
}
