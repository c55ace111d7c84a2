//! Provider webhook payload parsing.
//!
//! [`EventParser`] turns an authenticated payload into a canonical
//! [`VcsEvent`](super::VcsEvent), or into an explicit "ignored" outcome for
//! payloads that are well-formed but not actionable.
//!
//! # Parsing Strategy
//!
//! 1. The event kind is determined from a provider header (or, for Azure
//!    DevOps, from the payload's `eventType`).
//! 2. The payload is deserialized into raw structs whose fields are all
//!    optional, so partially-populated payloads still deserialize.
//! 3. The fields needed downstream are then required explicitly, producing
//!    a `"<field> is null"` error naming the first missing one.
//! 4. Unknown event kinds yield [`ParsedWebhook::Ignored`], not an error.

mod azure_devops;
mod bitbucket_cloud;
mod bitbucket_server;
mod github;
mod gitlab;

use std::collections::HashMap;
use std::sync::Mutex;

use axum::http::HeaderMap;
use thiserror::Error;

use super::events::ParsedWebhook;
use crate::types::{RepoError, VcsHostType};

pub use github::{RawGithubPull, RawGithubRepo};

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
pub const BITBUCKET_EVENT_TYPE_HEADER: &str = "x-event-key";
pub const BITBUCKET_CLOUD_REQUEST_ID_HEADER: &str = "x-request-uuid";
pub const BITBUCKET_SERVER_REQUEST_ID_HEADER: &str = "x-request-id";
pub const AZURE_DEVOPS_REQUEST_ID_HEADER: &str = "request-id";

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed.
    #[error("parsing json: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required downstream is absent or empty.
    #[error("{0} is null")]
    MissingField(&'static str),

    /// Field has an unexpected value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// The pull request state is not one the provider documents.
    #[error("unable to determine pull request state from {0:?}")]
    UnknownPullState(String),

    /// The repository fields failed validation.
    #[error("{0}")]
    Repo(#[from] RepoError),
}

/// Result type for parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Requires a field to be present.
pub(crate) fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(ParseError::MissingField(field))
}

/// Requires a string field to be present and non-empty.
pub(crate) fn require_str(value: Option<String>, field: &'static str) -> Result<String> {
    value
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::MissingField(field))
}

/// VCS API credentials, embedded into clone URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Credentials {
            user: user.into(),
            token: token.into(),
        }
    }
}

/// Parses provider payloads into canonical events.
#[derive(Debug, Default)]
pub struct EventParser {
    github: Credentials,
    gitlab: Credentials,
    bitbucket: Credentials,
    azure_devops: Credentials,

    /// Base URL of the Bitbucket Server instance, used to build clone and
    /// pull request URLs (the payloads carry neither).
    bitbucket_server_url: String,

    /// Whether draft pull requests are autoplanned.
    allow_draft_prs: bool,

    /// Last head SHA seen per Bitbucket Cloud pull request. Bitbucket Cloud
    /// sends `pullrequest:updated` for title and description edits too.
    last_bitbucket_sha: Mutex<HashMap<String, String>>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_github(mut self, creds: Credentials) -> Self {
        self.github = creds;
        self
    }

    pub fn with_gitlab(mut self, creds: Credentials) -> Self {
        self.gitlab = creds;
        self
    }

    pub fn with_bitbucket(mut self, creds: Credentials, server_url: impl Into<String>) -> Self {
        self.bitbucket = creds;
        self.bitbucket_server_url = server_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_azure_devops(mut self, creds: Credentials) -> Self {
        self.azure_devops = creds;
        self
    }

    pub fn with_allow_draft_prs(mut self, allow: bool) -> Self {
        self.allow_draft_prs = allow;
        self
    }

    pub fn github_credentials(&self) -> &Credentials {
        &self.github
    }

    /// Parses an authenticated payload from `host`.
    ///
    /// Returns `Ok(ParsedWebhook::Ignored(_))` for event kinds that are not
    /// handled, and `Err` for malformed payloads of handled kinds.
    pub fn parse(
        &self,
        host: VcsHostType,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<ParsedWebhook> {
        match host {
            VcsHostType::Github => {
                self.parse_github(header(headers, GITHUB_EVENT_HEADER), payload)
            }
            VcsHostType::Gitlab => {
                self.parse_gitlab(header(headers, GITLAB_EVENT_HEADER), payload)
            }
            VcsHostType::BitbucketCloud => {
                self.parse_bitbucket_cloud(header(headers, BITBUCKET_EVENT_TYPE_HEADER), payload)
            }
            VcsHostType::BitbucketServer => {
                self.parse_bitbucket_server(header(headers, BITBUCKET_EVENT_TYPE_HEADER), payload)
            }
            VcsHostType::AzureDevops => self.parse_azure_devops(payload),
        }
    }
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A parser with credentials configured for every host.
    pub fn parser() -> EventParser {
        EventParser::new()
            .with_github(Credentials::new("github-user", "github-token"))
            .with_gitlab(Credentials::new("gitlab-user", "gitlab-token"))
            .with_bitbucket(
                Credentials::new("bitbucket-user", "bitbucket-token"),
                "http://bitbucket.example.com:7990",
            )
            .with_azure_devops(Credentials::new("azure-user", "azure-token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn require_str_treats_empty_as_missing() {
        assert!(matches!(
            require_str(Some(String::new()), "head.sha"),
            Err(ParseError::MissingField("head.sha"))
        ));
        assert_eq!(
            require_str(None, "head.sha").unwrap_err().to_string(),
            "head.sha is null"
        );
        assert_eq!(require_str(Some("x".into()), "f").unwrap(), "x");
    }

    proptest! {
        /// Arbitrary bytes never panic the parser for any host.
        #[test]
        fn prop_parse_never_panics(payload: Vec<u8>, event in "[a-z_:]{0,24}") {
            let parser = test_support::parser();
            let mut headers = HeaderMap::new();
            if let Ok(v) = event.parse() {
                headers.insert(GITHUB_EVENT_HEADER, v);
            }
            for host in VcsHostType::ALL {
                let _ = parser.parse(host, &headers, &payload);
            }
        }
    }
}
