//! Bitbucket Server (self-hosted) pull request and comment payloads.
//!
//! Unlike Bitbucket Cloud, these payloads carry no URLs, so clone and pull
//! request URLs are rebuilt from the configured server base URL.

use serde::Deserialize;

use super::{EventParser, ParseError, Result, require, require_str};
use crate::types::{
    PullNum, PullRequest, PullRequestEventType, PullRequestState, Repo, Sha, User, VcsHostType,
};
use crate::webhooks::events::{CommentEvent, ParsedWebhook, PullEvent, VcsEvent};

const PULL_OPENED: &str = "pr:opened";
const PULL_FROM_REF_UPDATED: &str = "pr:from_ref_updated";
const PULL_MERGED: &str = "pr:merged";
const PULL_DECLINED: &str = "pr:declined";
const PULL_DELETED: &str = "pr:deleted";
const PULL_COMMENT_ADDED: &str = "pr:comment:added";

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    name: Option<String>,
    key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRepository {
    slug: Option<String>,
    project: Option<RawProject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRef {
    display_id: Option<String>,
    latest_commit: Option<String>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPullRequest {
    id: Option<u64>,
    state: Option<String>,
    from_ref: Option<RawRef>,
    to_ref: Option<RawRef>,
}

#[derive(Debug, Default, Deserialize)]
struct RawActor {
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawComment {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    actor: Option<RawActor>,
    pull_request: Option<RawPullRequest>,
    comment: Option<RawComment>,
}

/// Repository coordinates needed to rebuild URLs.
struct RepoCoords {
    full_name: String,
    key: String,
    slug: String,
}

fn repo_coords(raw: Option<RawRef>, field: &'static str) -> Result<(RepoCoords, RawRefRest)> {
    let raw = require(raw, field)?;
    let repo = require(raw.repository, field)?;
    let project = require(repo.project, field)?;
    let slug = require_str(repo.slug, field)?;
    let name = require_str(project.name, field)?;
    let key = require_str(project.key, field)?;
    Ok((
        RepoCoords {
            full_name: format!("{}/{}", name, slug),
            key,
            slug,
        },
        RawRefRest {
            display_id: raw.display_id,
            latest_commit: raw.latest_commit,
        },
    ))
}

struct RawRefRest {
    display_id: Option<String>,
    latest_commit: Option<String>,
}

impl EventParser {
    pub(super) fn parse_bitbucket_server(
        &self,
        event_type: &str,
        payload: &[u8],
    ) -> Result<ParsedWebhook> {
        let event_type_kind = match event_type {
            PULL_OPENED | PULL_FROM_REF_UPDATED => PullRequestEventType::Opened,
            PULL_MERGED | PULL_DECLINED | PULL_DELETED => PullRequestEventType::Closed,
            PULL_COMMENT_ADDED => {
                let mut raw: RawEvent = serde_json::from_slice(payload)?;
                let comment = require_str(
                    raw.comment.take().and_then(|c| c.text),
                    "comment.text",
                )?;
                let (pull, head_repo, user) = self.bitbucket_server_common(raw)?;
                return Ok(ParsedWebhook::Event(VcsEvent::BitbucketServerComment(
                    CommentEvent {
                        base_repo: pull.base_repo.clone(),
                        head_repo: Some(head_repo),
                        pull_num: pull.num,
                        pull: Some(pull),
                        user,
                        comment,
                    },
                )));
            }
            other => {
                return Ok(ParsedWebhook::Ignored(format!(
                    "Ignoring unsupported event type {}",
                    other
                )));
            }
        };

        let raw: RawEvent = serde_json::from_slice(payload)?;
        let (pull, head_repo, user) = self.bitbucket_server_common(raw)?;
        Ok(ParsedWebhook::Event(VcsEvent::BitbucketServerPull(PullEvent {
            pull,
            head_repo,
            event_type: event_type_kind,
            user,
        })))
    }

    fn bitbucket_server_repo(&self, coords: &RepoCoords) -> Result<Repo> {
        let clone_url = format!(
            "{}/scm/{}/{}.git",
            self.bitbucket_server_url,
            coords.key.to_lowercase(),
            coords.slug
        );
        Ok(Repo::new(
            VcsHostType::BitbucketServer,
            &coords.full_name,
            &clone_url,
            &self.bitbucket.user,
            &self.bitbucket.token,
        )?)
    }

    fn bitbucket_server_common(&self, raw: RawEvent) -> Result<(PullRequest, Repo, User)> {
        let pr = require(raw.pull_request, "pullRequest")?;
        let state = match require_str(pr.state, "pullRequest.state")?.as_str() {
            "OPEN" => PullRequestState::Open,
            "MERGED" | "DECLINED" => PullRequestState::Closed,
            other => return Err(ParseError::UnknownPullState(other.to_string())),
        };
        let num = require(pr.id, "pullRequest.id")?;

        let (head, from_ref) = repo_coords(pr.from_ref, "pullRequest.fromRef")?;
        let (base, to_ref) = repo_coords(pr.to_ref, "pullRequest.toRef")?;
        let head_repo = self.bitbucket_server_repo(&head)?;
        let base_repo = self.bitbucket_server_repo(&base)?;
        let username = require_str(raw.actor.and_then(|a| a.username), "actor.username")?;

        let pull = PullRequest {
            num: PullNum(num),
            head_commit: Sha::new(require_str(
                from_ref.latest_commit,
                "pullRequest.fromRef.latestCommit",
            )?),
            url: format!(
                "{}/projects/{}/repos/{}/pull-requests/{}",
                self.bitbucket_server_url, base.key, base.slug, num
            ),
            head_branch: require_str(from_ref.display_id, "pullRequest.fromRef.displayId")?,
            base_branch: require_str(to_ref.display_id, "pullRequest.toRef.displayId")?,
            author: username.clone(),
            state,
            base_repo,
        };
        Ok((pull, head_repo, User::new(username)))
    }
}
