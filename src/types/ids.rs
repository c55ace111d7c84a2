//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of identifiers (e.g. passing a workspace
//! where a repo-relative directory is expected) and make signatures self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullNum(pub u64);

impl fmt::Display for PullNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PullNum {
    fn from(n: u64) -> Self {
        PullNum(n)
    }
}

/// A git commit SHA.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string.
    ///
    /// Note: This does not validate the format. Providers report both full
    /// and abbreviated SHAs.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// The default Terraform workspace name.
pub const DEFAULT_WORKSPACE: &str = "default";

/// The repo root, as a repo-relative directory.
pub const DEFAULT_REPO_REL_DIR: &str = ".";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_short_handles_short_input() {
        assert_eq!(Sha::new("abc").short(), "abc");
        assert_eq!(Sha::new("0123456789abcdef").short(), "0123456");
    }

    #[test]
    fn pull_num_serializes_transparently() {
        let json = serde_json::to_string(&PullNum(42)).unwrap();
        assert_eq!(json, "42");
        let back: PullNum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PullNum(42));
    }
}
