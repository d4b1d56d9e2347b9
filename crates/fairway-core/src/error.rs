// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Fairway conversation sync engine.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across the store contract and all sync components.
#[derive(Debug, Error)]
pub enum FairwayError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote persistence failures (request rejected, connection dropped, bad payload).
    #[error("store error: {message}")]
    Store {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Push channel errors (`CHANNEL_ERROR`, unexpected close).
    #[error("channel error on {scope}: {message}")]
    Channel { scope: String, message: String },

    /// Operation timed out, including a push channel that never became active.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The reconnection coordinator gave up.
    #[error("gave up after {attempts} retries: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The operation was cancelled because its owner was closed.
    #[error("operation cancelled")]
    Cancelled,

    /// A send was attempted before the minimum inter-send interval elapsed.
    #[error("sending too soon, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A previous send has not resolved yet.
    #[error("a send is already in progress")]
    SendInProgress,

    /// No current user could be resolved.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Duplicate-key or conflict rejection from the store.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller supplied an invalid argument.
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FairwayError {
    /// Shorthand for a store error without an underlying source.
    pub fn store(message: impl Into<String>) -> Self {
        FairwayError::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a channel error on the given scope.
    pub fn channel(scope: impl std::fmt::Display, message: impl Into<String>) -> Self {
        FairwayError::Channel {
            scope: scope.to_string(),
            message: message.into(),
        }
    }

    /// Whether the failure is infrastructure flakiness that may succeed on retry.
    ///
    /// Rate-limit, auth, conflict and validation failures are policy or
    /// data-integrity violations and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FairwayError::Store { .. } | FairwayError::Channel { .. } | FairwayError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_transient() {
        assert!(FairwayError::store("connection reset").is_transient());
        assert!(FairwayError::channel("room:1", "CHANNEL_ERROR").is_transient());
        assert!(
            FairwayError::Timeout {
                duration: Duration::from_secs(10)
            }
            .is_transient()
        );
    }

    #[test]
    fn policy_errors_are_not_transient() {
        assert!(!FairwayError::SendInProgress.is_transient());
        assert!(
            !FairwayError::RateLimited {
                retry_after: Duration::from_millis(120)
            }
            .is_transient()
        );
        assert!(!FairwayError::NotAuthenticated.is_transient());
        assert!(!FairwayError::Conflict("duplicate key".into()).is_transient());
        assert!(!FairwayError::Cancelled.is_transient());
    }

    #[test]
    fn channel_error_renders_scope() {
        let err = FairwayError::channel("room:abc", "TIMED_OUT");
        assert_eq!(err.to_string(), "channel error on room:abc: TIMED_OUT");
    }
}
