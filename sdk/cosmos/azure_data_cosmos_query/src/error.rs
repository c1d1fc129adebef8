// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Error types for cross-partition query execution.

use std::fmt;

/// A specialized [`Result`](std::result::Result) for query engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An HTTP-equivalent status code reported by the query backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const GONE: StatusCode = StatusCode(410);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    /// Creates a status code from its numeric value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the numeric value of the status code.
    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A backend sub-status code, refining a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubStatusCode(u32);

impl SubStatusCode {
    pub const NONE: SubStatusCode = SubStatusCode(0);
    pub const PARTITION_KEY_RANGE_GONE: SubStatusCode = SubStatusCode(1002);

    /// Creates a sub-status code from its numeric value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value of the sub-status code.
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SubStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors produced while planning, executing or resuming a query.
///
/// Callers typically branch on three groups:
/// * [`Error::ClientValidation`] and [`Error::InvalidContinuationToken`] are raised before or instead of
///   any useful I/O and are never worth retrying as-is. An invalid continuation means the query should be
///   restarted from scratch.
/// * [`Error::Backend`] is passed through unchanged from the [`QueryBackend`](crate::backend::QueryBackend);
///   throttling and transient failures are the caller's (or the transport's) to retry.
/// * [`Error::FatalConsistency`] indicates the backend's partition topology could not be reconciled with
///   the query's recorded progress.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query or its options were rejected locally.
    #[error("client validation failed: {0}")]
    ClientValidation(String),

    /// A caller-supplied continuation token could not be parsed, or does not match the query.
    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    /// A range was constructed with `min > max`.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// The current partition layout does not cover the key space recorded in the query's progress.
    #[error("partition topology is inconsistent: {0}")]
    FatalConsistency(String),

    /// A backend request failed.
    #[error("backend request failed with status {status}.{sub_status}: {message}")]
    Backend {
        status: StatusCode,
        sub_status: SubStatusCode,
        message: String,
    },

    /// A payload could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates an [`Error::Backend`] with no sub-status.
    pub fn backend(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Backend {
            status,
            sub_status: SubStatusCode::NONE,
            message: message.into(),
        }
    }

    /// Creates an [`Error::Backend`] with the provided sub-status.
    pub fn backend_with_sub_status(
        status: StatusCode,
        sub_status: SubStatusCode,
        message: impl Into<String>,
    ) -> Self {
        Error::Backend {
            status,
            sub_status,
            message: message.into(),
        }
    }

    /// Gets the HTTP-equivalent status of this error, if it has one.
    ///
    /// Locally-detected validation failures report [`StatusCode::BAD_REQUEST`].
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::ClientValidation(_) | Error::InvalidContinuationToken(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            Error::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Indicates if the backend reported that the targeted partition range no longer exists.
    ///
    /// This is the routine signal that a split or merge happened, and is recovered by re-resolving ranges.
    pub fn is_range_gone(&self) -> bool {
        match self {
            Error::Backend {
                status, sub_status, ..
            } => {
                *status == StatusCode::NOT_FOUND
                    || (*status == StatusCode::GONE
                        && *sub_status == SubStatusCode::PARTITION_KEY_RANGE_GONE)
            }
            _ => false,
        }
    }

    /// Indicates if the error was raised by local validation, without contacting the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ClientValidation(_) | Error::InvalidContinuationToken(_) | Error::InvalidRange(_)
        )
    }

    /// Indicates if the error was caused by an unusable continuation token.
    pub fn is_invalid_continuation(&self) -> bool {
        matches!(self, Error::InvalidContinuationToken(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_range_gone() {
        let err = Error::backend(StatusCode::NOT_FOUND, "range 3 not found");
        assert!(err.is_range_gone());
        assert_eq!(Some(StatusCode::NOT_FOUND), err.status());
    }

    #[test]
    fn gone_requires_partition_sub_status() {
        let plain = Error::backend(StatusCode::GONE, "gone");
        assert!(!plain.is_range_gone());

        let split = Error::backend_with_sub_status(
            StatusCode::GONE,
            SubStatusCode::PARTITION_KEY_RANGE_GONE,
            "split",
        );
        assert!(split.is_range_gone());
    }

    #[test]
    fn throttling_is_not_range_gone() {
        let err = Error::backend(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(!err.is_range_gone());
        assert!(!err.is_client_error());
    }

    #[test]
    fn validation_errors_report_bad_request() {
        let err = Error::ClientValidation("cross partition query is disabled".into());
        assert_eq!(Some(StatusCode::BAD_REQUEST), err.status());
        assert!(err.is_client_error());

        let err = Error::InvalidContinuationToken("garbage".into());
        assert!(err.is_invalid_continuation());
        assert_eq!(Some(StatusCode::BAD_REQUEST), err.status());
    }

    #[test]
    fn backend_error_display_includes_status() {
        let err = Error::backend_with_sub_status(
            StatusCode::GONE,
            SubStatusCode::PARTITION_KEY_RANGE_GONE,
            "partition moved",
        );
        assert_eq!(
            "backend request failed with status 410.1002: partition moved",
            err.to_string()
        );
    }
}
