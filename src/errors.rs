//! Application error model with MCP error mapping
//!
//! Hard failures only. Domain outcomes such as "message not found while
//! replying" or "thread search found nothing" are modelled as result values
//! (`DeliveryResult`, `ThreadResult`) and never pass through this type.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Each variant maps to an MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (message, attachment)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, app password revoked)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Payload exceeds a caller-specified byte cap
    #[error("{what} is {actual} bytes, exceeding the limit of {limit} bytes")]
    TooLarge {
        what: String,
        limit: usize,
        actual: usize,
    },
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Timeout` → `internal_error`
    /// - `TooLarge` → `invalid_params` (with `limit_bytes` / `actual_bytes`)
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Timeout(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "timeout" })))
            }
            Self::TooLarge { limit, actual, .. } => ErrorData::invalid_params(
                self.to_string(),
                Some(json!({
                    "code": "too_large",
                    "limit_bytes": limit,
                    "actual_bytes": actual,
                })),
            ),
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn too_large_reports_both_sizes() {
        let err = AppError::TooLarge {
            what: "attachment 'report.pdf'".to_owned(),
            limit: 1_024,
            actual: 4_096,
        };
        assert_eq!(
            err.to_string(),
            "attachment 'report.pdf' is 4096 bytes, exceeding the limit of 1024 bytes"
        );

        let data = err.to_error_data();
        let extra = data.data.expect("structured data present");
        assert_eq!(extra["code"], "too_large");
        assert_eq!(extra["limit_bytes"], 1_024);
        assert_eq!(extra["actual_bytes"], 4_096);
    }

    #[test]
    fn not_found_maps_to_not_found_code() {
        let data = AppError::NotFound("message uid 7 not found".to_owned()).to_error_data();
        assert_eq!(data.data.expect("structured data")["code"], "not_found");
        assert!(data.message.contains("uid 7"));
    }
}
