//! Repository allowlist.
//!
//! Events from repositories that don't match the allowlist never reach the
//! command runner. Rules are matched against `{hostname}/{owner}/{repo}`,
//! case-insensitively, and `*` matches any run of characters (including
//! `/`), e.g. `github.com/runatlantis/*` or `*`.

use regex::Regex;
use thiserror::Error;

/// The wildcard character in allowlist rules.
pub const WILDCARD: char = '*';

/// Errors from building an allowlist.
#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("--repo-allowlist cannot contain ://, should be hostnames only")]
    ContainsScheme,

    #[error("invalid allowlist rule {rule:?}: {source}")]
    InvalidRule {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
enum Rule {
    Exact(String),
    Pattern(Regex),
}

/// Decides whether a repository may use the server.
#[derive(Debug, Clone)]
pub struct RepoAllowlistChecker {
    rules: Vec<Rule>,
}

impl RepoAllowlistChecker {
    /// Builds a checker from a comma-separated rule list.
    pub fn new(allowlist: &str) -> Result<Self, AllowlistError> {
        if allowlist.contains("://") {
            return Err(AllowlistError::ContainsScheme);
        }
        let rules = allowlist
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| {
                let rule = r.to_lowercase();
                if !rule.contains(WILDCARD) {
                    return Ok(Rule::Exact(rule));
                }
                let pattern = rule
                    .split(WILDCARD)
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                Regex::new(&format!("^{}$", pattern))
                    .map(Rule::Pattern)
                    .map_err(|source| AllowlistError::InvalidRule {
                        rule: r.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RepoAllowlistChecker { rules })
    }

    /// Whether `{hostname}/{full_name}` matches any rule.
    pub fn is_allowlisted(&self, repo_full_name: &str, vcs_hostname: &str) -> bool {
        let candidate = format!("{}/{}", vcs_hostname, repo_full_name).to_lowercase();
        self.rules.iter().any(|rule| match rule {
            Rule::Exact(r) => *r == candidate,
            Rule::Pattern(re) => re.is_match(&candidate),
        })
    }
}
