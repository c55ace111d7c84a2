//! Bitbucket Cloud (bitbucket.org) pull request and comment payloads.

use serde::Deserialize;

use super::{EventParser, ParseError, Result, require, require_str};
use crate::types::{
    PullNum, PullRequest, PullRequestEventType, PullRequestState, Repo, Sha, User, VcsHostType,
};
use crate::webhooks::events::{CommentEvent, ParsedWebhook, PullEvent, VcsEvent};

const PULL_CREATED: &str = "pullrequest:created";
const PULL_UPDATED: &str = "pullrequest:updated";
const PULL_FULFILLED: &str = "pullrequest:fulfilled";
const PULL_REJECTED: &str = "pullrequest:rejected";
const PULL_COMMENT_CREATED: &str = "pullrequest:comment_created";

#[derive(Debug, Default, Deserialize)]
struct RawLink {
    href: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLinks {
    html: Option<RawLink>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRepository {
    full_name: Option<String>,
    links: Option<RawLinks>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommit {
    hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBranch {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEndpoint {
    commit: Option<RawCommit>,
    branch: Option<RawBranch>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPullRequest {
    id: Option<u64>,
    state: Option<String>,
    links: Option<RawLinks>,
    source: Option<RawEndpoint>,
    destination: Option<RawEndpoint>,
}

#[derive(Debug, Default, Deserialize)]
struct RawActor {
    account_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    raw: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawComment {
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    actor: Option<RawActor>,
    repository: Option<RawRepository>,
    pullrequest: Option<RawPullRequest>,
    comment: Option<RawComment>,
}

fn html_href(links: Option<RawLinks>) -> Option<String> {
    links.and_then(|l| l.html).and_then(|h| h.href)
}

impl EventParser {
    pub(super) fn parse_bitbucket_cloud(
        &self,
        event_type: &str,
        payload: &[u8],
    ) -> Result<ParsedWebhook> {
        match event_type {
            PULL_CREATED | PULL_UPDATED | PULL_FULFILLED | PULL_REJECTED => {
                let raw: RawEvent = serde_json::from_slice(payload)?;
                let (pull, head_repo, user) = self.bitbucket_cloud_common(raw)?;
                let event_type = self.bitbucket_cloud_event_type(event_type, &pull);
                Ok(ParsedWebhook::Event(VcsEvent::BitbucketCloudPull(PullEvent {
                    pull,
                    head_repo,
                    event_type,
                    user,
                })))
            }
            PULL_COMMENT_CREATED => {
                let mut raw: RawEvent = serde_json::from_slice(payload)?;
                let comment = require_str(
                    raw.comment
                        .take()
                        .and_then(|c| c.content)
                        .and_then(|c| c.raw),
                    "comment.content.raw",
                )?;
                let (pull, head_repo, user) = self.bitbucket_cloud_common(raw)?;
                Ok(ParsedWebhook::Event(VcsEvent::BitbucketCloudComment(
                    CommentEvent {
                        base_repo: pull.base_repo.clone(),
                        head_repo: Some(head_repo),
                        pull_num: pull.num,
                        pull: Some(pull),
                        user,
                        comment,
                    },
                )))
            }
            other => Ok(ParsedWebhook::Ignored(format!(
                "Ignoring unsupported event type {}",
                other
            ))),
        }
    }

    /// Collapses repeated `pullrequest:updated` deliveries for the same head
    /// commit (title or description edits) into `Other`.
    fn bitbucket_cloud_event_type(&self, header: &str, pull: &PullRequest) -> PullRequestEventType {
        let key = format!("{}#{}", pull.base_repo.full_name, pull.num);
        let sha = pull.head_commit.as_str().to_string();
        let mut last = self
            .last_bitbucket_sha
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match header {
            PULL_CREATED => {
                last.insert(key, sha);
                PullRequestEventType::Opened
            }
            PULL_UPDATED => {
                if last.get(&key) == Some(&sha) {
                    return PullRequestEventType::Other;
                }
                last.insert(key, sha);
                PullRequestEventType::Updated
            }
            PULL_FULFILLED | PULL_REJECTED => {
                last.remove(&key);
                PullRequestEventType::Closed
            }
            _ => PullRequestEventType::Other,
        }
    }

    fn bitbucket_cloud_repo(
        &self,
        raw: Option<RawRepository>,
        field: &'static str,
    ) -> Result<Repo> {
        let raw = require(raw, field)?;
        Ok(Repo::new(
            VcsHostType::BitbucketCloud,
            &raw.full_name.unwrap_or_default(),
            &html_href(raw.links).unwrap_or_default(),
            &self.bitbucket.user,
            &self.bitbucket.token,
        )?)
    }

    fn bitbucket_cloud_common(&self, raw: RawEvent) -> Result<(PullRequest, Repo, User)> {
        let pr = require(raw.pullrequest, "pullrequest")?;
        let state = match require_str(pr.state, "pullrequest.state")?.as_str() {
            "OPEN" => PullRequestState::Open,
            "MERGED" | "SUPERSEDED" | "DECLINED" => PullRequestState::Closed,
            other => return Err(ParseError::UnknownPullState(other.to_string())),
        };

        let source = require(pr.source, "pullrequest.source")?;
        let destination = require(pr.destination, "pullrequest.destination")?;
        let head_repo =
            self.bitbucket_cloud_repo(source.repository, "pullrequest.source.repository")?;
        let base_repo = self.bitbucket_cloud_repo(raw.repository, "repository")?;
        let account = require_str(raw.actor.and_then(|a| a.account_id), "actor.account_id")?;

        let pull = PullRequest {
            num: PullNum(require(pr.id, "pullrequest.id")?),
            head_commit: Sha::new(require_str(
                source.commit.and_then(|c| c.hash),
                "pullrequest.source.commit.hash",
            )?),
            url: require_str(html_href(pr.links), "pullrequest.links.html.href")?,
            head_branch: require_str(
                source.branch.and_then(|b| b.name),
                "pullrequest.source.branch.name",
            )?,
            base_branch: require_str(
                destination.branch.and_then(|b| b.name),
                "pullrequest.destination.branch.name",
            )?,
            author: account.clone(),
            state,
            base_repo,
        };
        Ok((pull, head_repo, User::new(account)))
    }
}
