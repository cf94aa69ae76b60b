//! Client-facing error types and RFC7807 Problem Details parsing.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// The API answers most failures with this envelope; clients use it to turn
/// an error body into something worth showing a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`, then to a bare `message` field.
pub fn try_problem_detail(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<ProblemDetails>(body) {
        if let Some(detail) = parsed.detail {
            if !detail.trim().is_empty() {
                return Some(detail);
            }
        }
        if !parsed.title.trim().is_empty() {
            return Some(parsed.title);
        }
    }

    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let message = value.get("message")?.as_str()?;
    if message.trim().is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),
    /// The request exceeded its deadline. Never treated as an auth failure.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// The session was evicted; the user has to sign in again.
    #[error("session expired, sign in again")]
    Unauthenticated,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout(_))
    }

    /// Message suitable for display next to a form.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                try_problem_detail(body).unwrap_or_else(|| self.to_string())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail() {
        let body = r#"{"type":"about:blank","title":"Bad Request","status":400,"detail":"Amount must be positive"}"#;
        assert_eq!(
            try_problem_detail(body).as_deref(),
            Some("Amount must be positive")
        );
    }

    #[test]
    fn problem_detail_falls_back_to_title_then_message() {
        let body = r#"{"title":"Forbidden","detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Forbidden"));

        let body = r#"{"message":"Campaign not found"}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Campaign not found"));

        assert_eq!(try_problem_detail("<html>"), None);
    }

    #[test]
    fn user_message_for_http_error() {
        let err = ApiError::Http {
            status: 422,
            body: r#"{"detail":"Phone number is invalid"}"#.to_string(),
        };
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.user_message(), "Phone number is invalid");

        let err = ApiError::Http {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.user_message(), "HTTP 502: bad gateway");
    }

    #[test]
    fn timeout_is_its_own_class() {
        let err = ApiError::Timeout("30s elapsed".to_string());
        assert!(err.is_timeout());
        assert_eq!(err.status(), None);
        assert!(!ApiError::Unauthenticated.is_timeout());
    }
}
