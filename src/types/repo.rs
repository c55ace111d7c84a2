//! Repository identity as seen by every VCS provider.
//!
//! A [`Repo`] is constructed once from a provider payload and never mutated.
//! Construction validates that the clone URL points at the same repository as
//! the full name claims, and embeds the VCS credentials into the clone URL so
//! that `git clone` can authenticate without a credential helper.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// The kind of VCS host a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VcsHostType {
    Github,
    Gitlab,
    BitbucketCloud,
    BitbucketServer,
    AzureDevops,
}

impl VcsHostType {
    /// All host types, in a stable order.
    pub const ALL: [VcsHostType; 5] = [
        VcsHostType::Github,
        VcsHostType::Gitlab,
        VcsHostType::BitbucketCloud,
        VcsHostType::BitbucketServer,
        VcsHostType::AzureDevops,
    ];

    /// Human-readable provider name used in HTTP responses.
    pub fn display_name(&self) -> &'static str {
        match self {
            VcsHostType::Github => "GitHub",
            VcsHostType::Gitlab => "GitLab",
            VcsHostType::BitbucketCloud => "Bitbucket Cloud",
            VcsHostType::BitbucketServer => "Bitbucket Server",
            VcsHostType::AzureDevops => "AzureDevops",
        }
    }
}

impl fmt::Display for VcsHostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VcsHostType::Github => "Github",
            VcsHostType::Gitlab => "Gitlab",
            VcsHostType::BitbucketCloud => "BitbucketCloud",
            VcsHostType::BitbucketServer => "BitbucketServer",
            VcsHostType::AzureDevops => "AzureDevops",
        };
        f.write_str(s)
    }
}

/// The host a repository is served from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VcsHost {
    /// Hostname of the clone URL, e.g. `github.com` or `gitlab.example.com`.
    pub hostname: String,

    #[serde(rename = "type")]
    pub host_type: VcsHostType,
}

/// Errors from constructing a [`Repo`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("repoFullName can't be empty")]
    EmptyFullName,

    #[error("cloneURL can't be empty")]
    EmptyCloneUrl,

    #[error("invalid clone url: {0}")]
    InvalidCloneUrl(String),

    #[error("expected clone url to have path {expected:?} but had {actual:?}")]
    ClonePathMismatch { expected: String, actual: String },

    #[error("invalid repo format {full_name:?}, owner {owner:?} or repo {name:?} was empty")]
    EmptyOwnerOrName {
        full_name: String,
        owner: String,
        name: String,
    },

    #[error("invalid repo format {0:?}, expected owner/repo")]
    NestedOwner(String),
}

/// A VCS repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    /// Owner and name joined by `/`, e.g. `runatlantis/atlantis`. GitLab
    /// subgroups and Azure DevOps projects make the owner part contain `/`.
    pub full_name: String,

    /// Everything before the last `/` of `full_name`.
    pub owner: String,

    /// Everything after the last `/` of `full_name`.
    pub name: String,

    /// Clone URL with credentials embedded. Never log this.
    pub clone_url: String,

    /// Clone URL with the token replaced by `<redacted>`.
    pub sanitized_clone_url: String,

    pub vcs_host: VcsHost,
}

impl Repo {
    /// Constructs a repository, validating the clone URL against the full name.
    ///
    /// `.git` is appended to the clone URL unless the host is Azure DevOps.
    /// The clone URL path must equal `/{full_name}.git` except on Bitbucket
    /// Server and Azure DevOps, whose clone URLs are built by the parser from
    /// the same fields.
    pub fn new(
        host_type: VcsHostType,
        full_name: &str,
        clone_url: &str,
        vcs_user: &str,
        vcs_token: &str,
    ) -> Result<Self, RepoError> {
        if full_name.is_empty() {
            return Err(RepoError::EmptyFullName);
        }
        if clone_url.is_empty() {
            return Err(RepoError::EmptyCloneUrl);
        }

        let mut clone_url = clone_url.to_string();
        if !clone_url.ends_with(".git") && host_type != VcsHostType::AzureDevops {
            clone_url.push_str(".git");
        }

        let parsed =
            Url::parse(&clone_url).map_err(|e| RepoError::InvalidCloneUrl(e.to_string()))?;

        if host_type != VcsHostType::BitbucketServer && host_type != VcsHostType::AzureDevops {
            let expected = format!("/{}.git", full_name);
            if parsed.path() != expected {
                return Err(RepoError::ClonePathMismatch {
                    expected,
                    actual: parsed.path().to_string(),
                });
            }
        }

        let user = query_escape(vcs_user);
        let token = query_escape(vcs_token);
        let authed = inject_auth(&clone_url, &format!("{}:{}@", user, token));
        let sanitized = inject_auth(&clone_url, &format!("{}:<redacted>@", user));

        let (owner, name) = split_repo_full_name(full_name);
        if owner.is_empty() || name.is_empty() {
            return Err(RepoError::EmptyOwnerOrName {
                full_name: full_name.to_string(),
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        if host_type != VcsHostType::Gitlab
            && host_type != VcsHostType::AzureDevops
            && owner.contains('/')
        {
            return Err(RepoError::NestedOwner(full_name.to_string()));
        }

        Ok(Repo {
            full_name: full_name.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
            clone_url: authed,
            sanitized_clone_url: sanitized,
            vcs_host: VcsHost {
                hostname: parsed.host_str().unwrap_or_default().to_string(),
                host_type,
            },
        })
    }

    /// Globally unique identifier, `{hostname}/{full_name}`.
    pub fn id(&self) -> String {
        format!("{}/{}", self.vcs_host.hostname, self.full_name)
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Splits a full name into owner and name at the last `/`.
///
/// Returns empty strings for the missing half when there is no `/` or the
/// name ends with one.
pub fn split_repo_full_name(full_name: &str) -> (&str, &str) {
    match full_name.rfind('/') {
        Some(idx) if idx + 1 < full_name.len() => (&full_name[..idx], &full_name[idx + 1..]),
        _ => ("", ""),
    }
}

fn query_escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn inject_auth(clone_url: &str, auth: &str) -> String {
    for scheme in ["https://", "http://"] {
        if let Some(rest) = clone_url.strip_prefix(scheme) {
            return format!("{}{}{}", scheme, auth, rest);
        }
    }
    clone_url.to_string()
}
