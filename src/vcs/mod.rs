//! VCS API clients.
//!
//! Everything the command pipeline asks of a VCS host goes through the
//! [`VcsClient`] trait: posting comments, setting commit statuses, reading
//! review and mergeability state, and merging. [`ProxyClient`] routes each
//! call to the client for the repository's host.
//!
//! Only GitHub has a REST client ([`GithubClient`], built on octocrab with
//! retries for transient failures). Other hosts answer with a
//! "not configured" error.

mod error;
mod github;
mod proxy;
mod retry;

use async_trait::async_trait;

use crate::types::{PullNum, PullRequest, Repo};

pub use error::{Result, VcsError, VcsErrorKind};
pub use github::{GITHUB_MAX_COMMENT_LENGTH, GithubClient};
pub use proxy::ProxyClient;
pub use retry::{RetryConfig, RetryPolicy, RetryResult, retry_with_backoff};

/// State of a commit status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitStatus {
    Pending,
    Success,
    Failed,
}

/// Operations the server performs against a VCS host.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Fetches a pull request by number, along with the repository its head
    /// branch lives in.
    async fn get_pull_request(&self, repo: &Repo, num: PullNum) -> Result<(PullRequest, Repo)>;

    /// Files changed by the pull request, relative to the repo root. Renamed
    /// files are listed under both names.
    async fn get_modified_files(&self, repo: &Repo, pull: &PullRequest) -> Result<Vec<String>>;

    /// Posts a comment. `command` names the command whose output this is and
    /// is used in continuation headers when the comment has to be split.
    async fn create_comment(
        &self,
        repo: &Repo,
        pull_num: PullNum,
        comment: &str,
        command: &str,
    ) -> Result<()>;

    async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest) -> Result<bool>;

    async fn pull_is_mergeable(&self, repo: &Repo, pull: &PullRequest) -> Result<bool>;

    /// Sets the commit status `src` on the pull request's head commit.
    async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        src: &str,
        description: &str,
        url: &str,
    ) -> Result<()>;

    async fn merge_pull(&self, pull: &PullRequest) -> Result<()>;

    /// How to refer to `pull` from another pull request's comment.
    fn markdown_pull_link(&self, pull: &PullRequest) -> String;
}

/// Splits `comment` into pieces of at most `max_size` bytes.
///
/// Every piece but the last ends with `sep_end`; every piece but the first
/// starts with `sep_start`. Pieces never split a UTF-8 character.
pub fn split_comment(
    comment: &str,
    max_size: usize,
    sep_end: &str,
    sep_start: &str,
) -> Vec<String> {
    if comment.len() <= max_size {
        return vec![comment.to_string()];
    }
    let budget = max_size
        .saturating_sub(sep_end.len() + sep_start.len())
        .max(4);

    let mut pieces = Vec::new();
    let mut rest = comment;
    while !rest.is_empty() {
        let mut end = budget.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head.to_string());
        rest = tail;
    }

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let mut out = String::new();
            if i > 0 {
                out.push_str(sep_start);
            }
            out.push_str(&piece);
            if i < last {
                out.push_str(sep_end);
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_comment_is_unchanged() {
        assert_eq!(split_comment("hello", 10, "<end>", "<start>"), vec!["hello"]);
    }

    #[test]
    fn long_comment_gets_separators() {
        let comment = "a".repeat(25);
        let pieces = split_comment(&comment, 12, "]", "[");
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0], format!("{}]", "a".repeat(10)));
        assert_eq!(pieces[1], format!("[{}]", "a".repeat(10)));
        assert_eq!(pieces[2], format!("[{}", "a".repeat(5)));
    }

    proptest! {
        /// Pieces respect the limit and reassemble into the original.
        #[test]
        fn pieces_fit_and_reassemble(comment in "\\PC{0,300}", max in 20usize..80) {
            let pieces = split_comment(&comment, max, "<e>", "<s>");
            let mut joined = String::new();
            for (i, p) in pieces.iter().enumerate() {
                prop_assert!(p.len() <= max);
                let mut p = p.as_str();
                if i > 0 { p = p.strip_prefix("<s>").unwrap(); }
                if i + 1 < pieces.len() { p = p.strip_suffix("<e>").unwrap(); }
                joined.push_str(p);
            }
            prop_assert_eq!(joined, comment);
        }
    }
}
