//! GitHub `pull_request` and `issue_comment` payloads.

use serde::Deserialize;

use super::{EventParser, Result, require, require_str};
use crate::types::{
    PullNum, PullRequest, PullRequestEventType, PullRequestState, Repo, Sha, User, VcsHostType,
};
use crate::webhooks::events::{CommentEvent, ParsedWebhook, PullEvent, VcsEvent};

// ============================================================================
// Raw payload structures
//
// These are shared with the REST client: the pull request object in a webhook
// has the same shape as `GET /repos/{owner}/{repo}/pulls/{number}`.
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RawGithubRepo {
    pub full_name: Option<String>,
    pub clone_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGithubUser {
    pub login: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGithubRef {
    pub sha: Option<String>,
    #[serde(rename = "ref")]
    pub ref_name: Option<String>,
    pub repo: Option<RawGithubRepo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGithubPull {
    pub number: Option<u64>,
    pub html_url: Option<String>,
    pub state: Option<String>,
    pub draft: Option<bool>,
    pub user: Option<RawGithubUser>,
    pub head: Option<RawGithubRef>,
    pub base: Option<RawGithubRef>,
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: Option<String>,
    pull_request: Option<RawGithubPull>,
    sender: Option<RawGithubUser>,
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: Option<String>,
    comment: Option<RawComment>,
    issue: Option<RawIssue>,
    repository: Option<RawGithubRepo>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    body: Option<String>,
    user: Option<RawGithubUser>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: Option<u64>,
}

impl EventParser {
    pub(super) fn parse_github(&self, event_type: &str, payload: &[u8]) -> Result<ParsedWebhook> {
        match event_type {
            "pull_request" => self.parse_github_pull_event(payload),
            "issue_comment" => self.parse_github_comment_event(payload),
            _ => Ok(ParsedWebhook::ignored("Ignoring unsupported event")),
        }
    }

    /// Converts a GitHub repository object into a [`Repo`].
    pub fn parse_github_repo(&self, raw: Option<RawGithubRepo>) -> Result<Repo> {
        let raw = raw.unwrap_or_default();
        Ok(Repo::new(
            VcsHostType::Github,
            &raw.full_name.unwrap_or_default(),
            &raw.clone_url.unwrap_or_default(),
            &self.github.user,
            &self.github.token,
        )?)
    }

    /// Converts a GitHub pull request object into a [`PullRequest`] and its
    /// head repository.
    pub fn parse_github_pull(&self, raw: RawGithubPull) -> Result<(PullRequest, Repo)> {
        let head = require(raw.head, "head")?;
        let base = require(raw.base, "base")?;

        let head_commit = require_str(head.sha, "head.sha")?;
        let url = require_str(raw.html_url, "html_url")?;
        let head_branch = require_str(head.ref_name, "head.ref")?;
        let base_branch = require_str(base.ref_name, "base.ref")?;
        let author = require_str(raw.user.and_then(|u| u.login), "user.login")?;
        let num = require(raw.number.filter(|n| *n != 0), "number")?;

        let base_repo = self.parse_github_repo(base.repo)?;
        let head_repo = self.parse_github_repo(head.repo)?;

        let state = if raw.state.as_deref() == Some("open") {
            PullRequestState::Open
        } else {
            PullRequestState::Closed
        };

        Ok((
            PullRequest {
                num: PullNum(num),
                head_commit: Sha::new(head_commit),
                url,
                head_branch,
                base_branch,
                author,
                state,
                base_repo,
            },
            head_repo,
        ))
    }

    fn parse_github_pull_event(&self, payload: &[u8]) -> Result<ParsedWebhook> {
        let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;
        let raw_pull = require(raw.pull_request, "pull_request")?;
        let is_draft = raw_pull.draft.unwrap_or(false);
        let (pull, head_repo) = self.parse_github_pull(raw_pull)?;
        let sender = require_str(
            require(raw.sender, "sender")?.login,
            "sender.login",
        )?;

        let action = raw.action.unwrap_or_default();
        // Drafts are not autoplanned, but closing one must still clean up
        // locks from plans run on it manually.
        let event_type = if is_draft && action != "closed" && !self.allow_draft_prs {
            PullRequestEventType::Other
        } else {
            match action.as_str() {
                "opened" | "ready_for_review" => PullRequestEventType::Opened,
                "synchronize" => PullRequestEventType::Updated,
                "closed" => PullRequestEventType::Closed,
                _ => PullRequestEventType::Other,
            }
        };

        Ok(ParsedWebhook::Event(VcsEvent::GithubPull(PullEvent {
            pull,
            head_repo,
            event_type,
            user: User::new(sender),
        })))
    }

    fn parse_github_comment_event(&self, payload: &[u8]) -> Result<ParsedWebhook> {
        let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;
        if raw.action.as_deref() != Some("created") {
            return Ok(ParsedWebhook::ignored(
                "Ignoring comment event since action was not created",
            ));
        }

        let base_repo = self.parse_github_repo(raw.repository)?;
        let comment = require(raw.comment, "comment")?;
        let username = require_str(comment.user.and_then(|u| u.login), "comment.user.login")?;
        let pull_num = require(
            raw.issue.and_then(|i| i.number).filter(|n| *n != 0),
            "issue.number",
        )?;

        Ok(ParsedWebhook::Event(VcsEvent::GithubComment(CommentEvent {
            base_repo,
            head_repo: None,
            pull: None,
            pull_num: PullNum(pull_num),
            user: User::new(username),
            comment: comment.body.unwrap_or_default(),
        })))
    }
}
