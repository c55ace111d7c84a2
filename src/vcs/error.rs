//! VCS API error types.
//!
//! Errors are classified so the retry loop knows what to do with them:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures,
//!   and GitHub's eventually-consistent 404s right after a webhook)
//! - **Permanent** errors are returned to the caller immediately

use std::fmt;
use thiserror::Error;

use crate::types::VcsHostType;

/// The kind of VCS API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Retrying won't help.
    Permanent,
}

impl VcsErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, VcsErrorKind::Transient)
    }
}

/// A VCS API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct VcsError {
    pub kind: VcsErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if any.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Result type for VCS client calls.
pub type Result<T> = std::result::Result<T, VcsError>;

impl VcsError {
    /// Creates a permanent error without an octocrab source.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: VcsErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: VcsErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// The error for a host that has no API client configured.
    pub fn not_configured(host: VcsHostType) -> Self {
        Self::permanent(format!(
            "no API client is configured for {}",
            host.display_name()
        ))
    }

    /// Prefixes the message with what was being attempted.
    pub fn context(mut self, what: &str) -> Self {
        self.message = format!("{}: {}", what, self.message);
        self
    }

    /// Categorizes an octocrab error by status code and message.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();

        let kind = match status_code {
            Some(429) => VcsErrorKind::Transient,
            Some(403) if is_rate_limit_error(&message) => VcsErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => VcsErrorKind::Transient,
            Some(_) => VcsErrorKind::Permanent,
            None if is_network_error(&message) => VcsErrorKind::Transient,
            None => VcsErrorKind::Permanent,
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }

    /// Like [`VcsError::from_octocrab`], but treats 404 as transient.
    ///
    /// GitHub sometimes answers 404 for a pull request it has just sent a
    /// webhook about.
    pub fn from_octocrab_retrying_not_found(err: octocrab::Error) -> Self {
        let mut e = Self::from_octocrab(err);
        if e.status_code == Some(404) {
            e.kind = VcsErrorKind::Transient;
        }
        e
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// octocrab does not expose the status across all error variants, so this
/// falls back to the rendered message. `None` leads to conservative
/// categorization.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    if let octocrab::Error::GitHub { source, .. } = err {
        return Some(source.status_code.as_u16());
    }
    status_code_from_message(&err.to_string())
}

fn status_code_from_message(err_str: &str) -> Option<u16> {
    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if let Ok(code) = rest[..end].parse() {
            return Some(code);
        }
    }

    let lower = err_str.to_lowercase();
    if err_str.contains("404") && lower.contains("not found") {
        return Some(404);
    }
    [422, 403, 401, 429, 500, 502, 503]
        .into_iter()
        .find(|code| err_str.contains(&code.to_string()))
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}
