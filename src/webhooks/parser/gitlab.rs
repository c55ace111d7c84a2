//! GitLab `Merge Request Hook` and `Note Hook` payloads.

use serde::Deserialize;

use super::{EventParser, Result, require, require_str};
use crate::types::{
    PullNum, PullRequest, PullRequestEventType, PullRequestState, Repo, Sha, User, VcsHostType,
};
use crate::webhooks::events::{CommentEvent, ParsedWebhook, PullEvent, VcsEvent};

const MERGE_REQUEST_HOOK: &str = "Merge Request Hook";
const NOTE_HOOK: &str = "Note Hook";

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    path_with_namespace: Option<String>,
    git_http_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCommit {
    id: Option<String>,
}

/// Fields shared by `object_attributes` of merge request events and the
/// `merge_request` object of note events.
#[derive(Debug, Default, Deserialize)]
struct RawMergeRequest {
    iid: Option<u64>,
    url: Option<String>,
    state: Option<String>,
    source_branch: Option<String>,
    target_branch: Option<String>,
    last_commit: Option<RawCommit>,
    source: Option<RawProject>,
    author: Option<RawUser>,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    draft: bool,
    action: Option<String>,
    oldrev: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTitleChange {
    previous: Option<String>,
    current: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChanges {
    title: Option<RawTitleChange>,
}

#[derive(Debug, Deserialize)]
struct RawMergeEvent {
    user: Option<RawUser>,
    project: Option<RawProject>,
    object_attributes: Option<RawMergeRequest>,
    changes: Option<RawChanges>,
}

#[derive(Debug, Deserialize)]
struct RawNoteAttributes {
    note: Option<String>,
    noteable_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNoteEvent {
    user: Option<RawUser>,
    project: Option<RawProject>,
    object_attributes: Option<RawNoteAttributes>,
    merge_request: Option<RawMergeRequest>,
}

impl EventParser {
    pub(super) fn parse_gitlab(&self, event_type: &str, payload: &[u8]) -> Result<ParsedWebhook> {
        match event_type {
            MERGE_REQUEST_HOOK => self.parse_gitlab_merge_event(payload),
            NOTE_HOOK => self.parse_gitlab_note_event(payload),
            _ => Ok(ParsedWebhook::ignored("Ignoring unsupported event")),
        }
    }

    fn gitlab_repo(&self, project: Option<RawProject>, field: &'static str) -> Result<Repo> {
        let project = require(project, field)?;
        Ok(Repo::new(
            VcsHostType::Gitlab,
            &project.path_with_namespace.unwrap_or_default(),
            &project.git_http_url.unwrap_or_default(),
            &self.gitlab.user,
            &self.gitlab.token,
        )?)
    }

    fn gitlab_pull(
        &self,
        mr: &mut RawMergeRequest,
        base_repo: Repo,
        author: Option<String>,
    ) -> Result<PullRequest> {
        // GitLab also has a "merged" state, which maps to closed.
        let state = if mr.state.as_deref() == Some("opened") {
            PullRequestState::Open
        } else {
            PullRequestState::Closed
        };
        Ok(PullRequest {
            num: PullNum(require(mr.iid, "object_attributes.iid")?),
            head_commit: Sha::new(require_str(
                mr.last_commit.take().and_then(|c| c.id),
                "object_attributes.last_commit.id",
            )?),
            url: mr.url.take().unwrap_or_default(),
            head_branch: require_str(mr.source_branch.take(), "object_attributes.source_branch")?,
            base_branch: require_str(mr.target_branch.take(), "object_attributes.target_branch")?,
            author: author.unwrap_or_default(),
            state,
            base_repo,
        })
    }

    fn parse_gitlab_merge_event(&self, payload: &[u8]) -> Result<ParsedWebhook> {
        let raw: RawMergeEvent = serde_json::from_slice(payload)?;
        let mut attrs = require(raw.object_attributes, "object_attributes")?;
        let base_repo = self.gitlab_repo(raw.project, "project")?;
        let head_repo = self.gitlab_repo(attrs.source.take(), "object_attributes.source")?;
        let username = require_str(raw.user.and_then(|u| u.username), "user.username")?;

        let pull = self.gitlab_pull(&mut attrs, base_repo, Some(username.clone()))?;

        let action = attrs.action.as_deref().unwrap_or_default();
        let is_draft = attrs.work_in_progress || attrs.draft;
        let event_type = if is_draft && action != "close" && !self.allow_draft_prs {
            PullRequestEventType::Other
        } else {
            match action {
                "open" => PullRequestEventType::Opened,
                "update" => classify_update(&attrs, raw.changes.as_ref()),
                "merge" | "close" => PullRequestEventType::Closed,
                _ => PullRequestEventType::Other,
            }
        };

        Ok(ParsedWebhook::Event(VcsEvent::GitlabPull(PullEvent {
            pull,
            head_repo,
            event_type,
            user: User::new(username),
        })))
    }

    fn parse_gitlab_note_event(&self, payload: &[u8]) -> Result<ParsedWebhook> {
        let raw: RawNoteEvent = serde_json::from_slice(payload)?;
        let attrs = require(raw.object_attributes, "object_attributes")?;
        match attrs.noteable_type.as_deref() {
            Some("MergeRequest") => {}
            Some("Commit") => {
                return Ok(ParsedWebhook::ignored("Ignoring comment on commit event"));
            }
            _ => return Ok(ParsedWebhook::ignored("Ignoring unsupported event")),
        }

        let base_repo = self.gitlab_repo(raw.project, "project")?;
        let username = require_str(raw.user.and_then(|u| u.username), "user.username")?;
        let mut mr = require(raw.merge_request, "merge_request")?;
        let head_repo = self.gitlab_repo(mr.source.take(), "merge_request.source")?;
        let pull_num = require(mr.iid, "merge_request.iid")?;
        let author = mr.author.take().and_then(|a| a.username);
        // The note payload embeds the merge request; if it is incomplete the
        // command runner fetches it from the API instead.
        let pull = self.gitlab_pull(&mut mr, base_repo.clone(), author).ok();

        Ok(ParsedWebhook::Event(VcsEvent::GitlabComment(CommentEvent {
            base_repo,
            head_repo: Some(head_repo),
            pull,
            pull_num: PullNum(pull_num),
            user: User::new(username),
            comment: attrs.note.unwrap_or_default(),
        })))
    }
}

/// An update is actionable when it pushed commits or took the merge request
/// out of draft.
fn classify_update(attrs: &RawMergeRequest, changes: Option<&RawChanges>) -> PullRequestEventType {
    let new_commits = attrs.oldrev.as_deref().is_some_and(|r| !r.is_empty());
    let undrafted = changes
        .and_then(|c| c.title.as_ref())
        .is_some_and(|t| {
            t.previous.as_deref().is_some_and(|p| p.starts_with("Draft:"))
                && !t.current.as_deref().unwrap_or_default().starts_with("Draft:")
        });
    if new_commits || undrafted {
        PullRequestEventType::Updated
    } else {
        PullRequestEventType::Other
    }
}
