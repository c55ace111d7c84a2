//! GitHub REST client built on octocrab.
//!
//! Calls go through octocrab's raw REST helpers with small serde structs for
//! the fields we read. Idempotent calls are retried with backoff; comment
//! creation and merging are not, since a retry after a lost response would
//! post or merge twice.

use async_trait::async_trait;
use octocrab::Octocrab;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{Result, VcsError};
use super::retry::{RetryConfig, RetryPolicy, retry_with_backoff};
use super::{CommitStatus, VcsClient, split_comment};
use crate::types::{PullNum, PullRequest, Repo};
use crate::webhooks::{Credentials, EventParser};
use crate::webhooks::parser::RawGithubPull;

/// Maximum number of characters GitHub accepts in a single comment.
pub const GITHUB_MAX_COMMENT_LENGTH: usize = 65536;

const PAGE_SIZE: u32 = 100;

const SEP_END: &str = "\n```\n</details>\n<br>\n\n**Warning**: Output length greater than max comment size. Continued in next comment.";

/// A GitHub (or GitHub Enterprise) API client.
pub struct GithubClient {
    client: Octocrab,

    /// Converts pull request objects with the same rules as webhooks.
    parser: EventParser,

    retry: RetryConfig,
}

impl GithubClient {
    /// Creates a client authenticating with a personal access token.
    ///
    /// Any hostname other than `github.com` is treated as GitHub Enterprise,
    /// whose API lives under `/api/v3/`.
    pub fn new(
        hostname: &str,
        user: &str,
        token: &str,
    ) -> std::result::Result<Self, octocrab::Error> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if hostname != "github.com" {
            builder = builder.base_uri(format!("https://{}/api/v3/", hostname))?;
        }
        Ok(Self {
            client: builder.build()?,
            parser: EventParser::new().with_github(Credentials::new(user, token)),
            retry: RetryConfig::DEFAULT,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json<R, P>(
        &self,
        route: &str,
        params: Option<&P>,
        retry_not_found: bool,
    ) -> Result<R>
    where
        R: DeserializeOwned + Send,
        P: Serialize + Sync,
    {
        let client = &self.client;
        retry_with_backoff(self.retry, RetryPolicy::RetryTransient, move || async move {
            client.get::<R, _, P>(route, params).await.map_err(|e| {
                if retry_not_found {
                    VcsError::from_octocrab_retrying_not_found(e)
                } else {
                    VcsError::from_octocrab(e)
                }
            })
        })
        .await
        .into_result()
    }

    async fn get_raw_pull(&self, repo: &Repo, num: PullNum) -> Result<RawGithubPull> {
        let route = format!("/repos/{}/{}/pulls/{}", repo.owner, repo.name, num);
        debug!(%repo, pull = %num, "GET pull request");
        self.get_json::<RawGithubPull, ()>(&route, None, true).await
    }
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient").finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct PageParams {
    per_page: u32,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: Option<String>,
    status: Option<String>,
    previous_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRepoSettings {
    allow_merge_commit: Option<bool>,
    allow_rebase_merge: Option<bool>,
    allow_squash_merge: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged: bool,
    message: Option<String>,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    state: &'static str,
    description: &'a str,
    context: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    target_url: &'a str,
}

#[derive(Serialize)]
struct MergeRequest {
    merge_method: &'static str,
}

fn status_state(state: CommitStatus) -> &'static str {
    match state {
        CommitStatus::Pending => "pending",
        CommitStatus::Success => "success",
        CommitStatus::Failed => "failure",
    }
}

/// Header of every continuation comment.
fn continuation_header(command: &str) -> String {
    if command.is_empty() {
        "Continued from previous comment.\n<details><summary>Show Output</summary>\n\n```diff\n"
            .to_string()
    } else {
        format!(
            "Continued {} output from previous comment.\n<details><summary>Show Output</summary>\n\n```diff\n",
            command
        )
    }
}

/// The merge button states GitHub lets a user click.
fn is_mergeable_state(state: Option<&str>) -> bool {
    matches!(state, Some("clean" | "unstable" | "has_hooks"))
}

/// Picks the merge method: merge commits if allowed, else rebase, else squash.
fn merge_method(settings: &RawRepoSettings) -> &'static str {
    if settings.allow_merge_commit.unwrap_or(true) {
        "merge"
    } else if settings.allow_rebase_merge.unwrap_or(false) {
        "rebase"
    } else if settings.allow_squash_merge.unwrap_or(false) {
        "squash"
    } else {
        "merge"
    }
}

#[async_trait]
impl VcsClient for GithubClient {
    async fn get_pull_request(&self, repo: &Repo, num: PullNum) -> Result<(PullRequest, Repo)> {
        let raw = self.get_raw_pull(repo, num).await?;
        self.parser
            .parse_github_pull(raw)
            .map_err(|e| VcsError::permanent(format!("parsing pull request: {}", e)))
    }

    async fn get_modified_files(&self, repo: &Repo, pull: &PullRequest) -> Result<Vec<String>> {
        let route = format!("/repos/{}/{}/pulls/{}/files", repo.owner, repo.name, pull.num);
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let params = PageParams {
                per_page: PAGE_SIZE,
                page,
            };
            let items: Vec<RawFile> = self.get_json(&route, Some(&params), true).await?;
            let is_last_page = items.len() < PAGE_SIZE as usize;
            for f in items {
                if let Some(name) = f.filename {
                    files.push(name);
                }
                if f.status.as_deref() == Some("renamed") {
                    files.extend(f.previous_filename);
                }
            }
            if is_last_page {
                break;
            }
            page += 1;
        }
        debug!(%repo, pull = %pull.num, count = files.len(), "Fetched modified files");
        Ok(files)
    }

    async fn create_comment(
        &self,
        repo: &Repo,
        pull_num: PullNum,
        comment: &str,
        command: &str,
    ) -> Result<()> {
        let route = format!("/repos/{}/{}/issues/{}/comments", repo.owner, repo.name, pull_num);
        let sep_start = continuation_header(command);
        for body in split_comment(comment, GITHUB_MAX_COMMENT_LENGTH, SEP_END, &sep_start) {
            let client = &self.client;
            let (route, body) = (route.as_str(), body.as_str());
            retry_with_backoff(self.retry, RetryPolicy::NoRetry, move || async move {
                client
                    .post::<_, serde_json::Value>(route, Some(&CommentRequest { body }))
                    .await
                    .map_err(VcsError::from_octocrab)
            })
            .await
            .into_result()
            .map_err(|e| e.context("creating comment"))?;
        }
        debug!(%repo, pull = %pull_num, "Created comment");
        Ok(())
    }

    async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        let route = format!("/repos/{}/{}/pulls/{}/reviews", repo.owner, repo.name, pull.num);
        let mut page = 1;
        loop {
            let params = PageParams {
                per_page: PAGE_SIZE,
                page,
            };
            let reviews: Vec<RawReview> = self
                .get_json(&route, Some(&params), false)
                .await
                .map_err(|e| e.context("getting reviews"))?;
            if reviews.iter().any(|r| r.state.as_deref() == Some("APPROVED")) {
                return Ok(true);
            }
            if reviews.len() < PAGE_SIZE as usize {
                return Ok(false);
            }
            page += 1;
        }
    }

    async fn pull_is_mergeable(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        let raw = self
            .get_raw_pull(repo, pull.num)
            .await
            .map_err(|e| e.context("getting pull request"))?;
        Ok(is_mergeable_state(raw.mergeable_state.as_deref()))
    }

    async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        src: &str,
        description: &str,
        url: &str,
    ) -> Result<()> {
        let route = format!("/repos/{}/{}/statuses/{}", repo.owner, repo.name, pull.head_commit);
        let request = StatusRequest {
            state: status_state(state),
            description,
            context: src,
            target_url: url,
        };
        info!(%repo, context = src, state = request.state, "Updating GitHub commit status");
        let client = &self.client;
        let (route, request) = (route.as_str(), &request);
        retry_with_backoff(self.retry, RetryPolicy::RetryTransient, move || async move {
            client
                .post::<_, serde_json::Value>(route, Some(request))
                .await
                .map_err(VcsError::from_octocrab)
        })
        .await
        .into_result()
        .map(|_| ())
    }

    async fn merge_pull(&self, pull: &PullRequest) -> Result<()> {
        let repo = &pull.base_repo;
        let settings: RawRepoSettings = self
            .get_json::<_, ()>(&format!("/repos/{}/{}", repo.owner, repo.name), None, false)
            .await
            .map_err(|e| e.context("fetching repo info"))?;

        let route = format!("/repos/{}/{}/pulls/{}/merge", repo.owner, repo.name, pull.num);
        let request = MergeRequest {
            merge_method: merge_method(&settings),
        };
        debug!(%repo, pull = %pull.num, method = request.merge_method, "Merging pull request");
        let response: MergeResponse = self
            .client
            .put(&route, Some(&request))
            .await
            .map_err(|e| VcsError::from_octocrab(e).context("merging pull request"))?;

        if !response.merged {
            return Err(VcsError::permanent(format!(
                "could not merge pull request: {}",
                response.message.as_deref().unwrap_or_default()
            )));
        }
        Ok(())
    }

    fn markdown_pull_link(&self, pull: &PullRequest) -> String {
        format!("#{}", pull.num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_states_use_github_names() {
        assert_eq!(status_state(CommitStatus::Pending), "pending");
        assert_eq!(status_state(CommitStatus::Success), "success");
        assert_eq!(status_state(CommitStatus::Failed), "failure");
    }

    #[test]
    fn continuation_header_names_command() {
        assert!(continuation_header("plan").starts_with("Continued plan output from previous comment."));
        assert!(continuation_header("").starts_with("Continued from previous comment."));
        assert!(continuation_header("apply").ends_with("```diff\n"));
    }

    #[test]
    fn mergeable_states() {
        for s in ["clean", "unstable", "has_hooks"] {
            assert!(is_mergeable_state(Some(s)));
        }
        for s in ["blocked", "dirty", "unknown", "behind"] {
            assert!(!is_mergeable_state(Some(s)));
        }
        assert!(!is_mergeable_state(None));
    }

    #[test]
    fn merge_method_preference() {
        let all = RawRepoSettings {
            allow_merge_commit: Some(true),
            allow_rebase_merge: Some(true),
            allow_squash_merge: Some(true),
        };
        assert_eq!(merge_method(&all), "merge");

        let no_merge = RawRepoSettings {
            allow_merge_commit: Some(false),
            ..all
        };
        assert_eq!(merge_method(&no_merge), "rebase");

        let squash_only = RawRepoSettings {
            allow_merge_commit: Some(false),
            allow_rebase_merge: Some(false),
            allow_squash_merge: Some(true),
        };
        assert_eq!(merge_method(&squash_only), "squash");
    }

    #[test]
    fn status_request_omits_empty_url() {
        let req = StatusRequest {
            state: "pending",
            description: "Plan in progress...",
            context: "atlantis/plan",
            target_url: "",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("target_url").is_none());
        assert_eq!(json["context"], "atlantis/plan");
    }
}
