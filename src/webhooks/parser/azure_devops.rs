//! Azure DevOps service hook payloads.
//!
//! Azure DevOps sends every event type to the same endpoint and names the
//! kind in the payload's `eventType`. It has no structured "not actionable"
//! flag, so reviewer and vote updates are recognised by their message text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use url::Url;

use super::{EventParser, Result, require, require_str};
use crate::types::{
    PullNum, PullRequest, PullRequestEventType, PullRequestState, Repo, Sha, User, VcsHostType,
};
use crate::webhooks::events::{CommentEvent, ParsedWebhook, PullEvent, VcsEvent};

const PULL_CREATED: &str = "git.pullrequest.created";
const PULL_UPDATED: &str = "git.pullrequest.updated";
const PULL_COMMENTED: &str = "ms.vss-code.git-pullrequest-comment-event";

/// The host of the sample repository used by the "Test" button in the
/// service hook UI.
const TEST_EVENT_HOST: &str = "fabrikam.visualstudio.com";

/// Message fragments of `git.pullrequest.updated` events that do not change
/// the code under review.
const IGNORED_UPDATE_MESSAGES: [&str; 6] = [
    "changed the reviewer list",
    "approved pull request",
    "has approved and left suggestions",
    "is waiting for the author",
    "rejected pull request",
    "voted on pull request",
];

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex is valid"));

#[derive(Debug, Default, Deserialize)]
struct RawNamed {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepository {
    name: Option<String>,
    web_url: Option<String>,
    project: Option<RawNamed>,
    parent_repository: Option<RawNamed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIdentity {
    unique_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommit {
    commit_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPullRequest {
    pull_request_id: Option<u64>,
    status: Option<String>,
    url: Option<String>,
    source_ref_name: Option<String>,
    target_ref_name: Option<String>,
    last_merge_source_commit: Option<RawCommit>,
    created_by: Option<RawIdentity>,
    repository: Option<RawRepository>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawComment {
    content: Option<String>,
    author: Option<RawIdentity>,
    #[serde(default)]
    is_deleted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommentResource {
    comment: Option<RawComment>,
    pull_request: Option<RawPullRequest>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    event_type: Option<String>,
    message: Option<RawMessage>,
    resource: Option<serde_json::Value>,
}

/// Removes HTML markup from a comment body. Azure DevOps delivers comments
/// as rendered HTML.
pub fn strip_html(s: &str) -> String {
    HTML_TAG
        .replace_all(s, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn is_test_event(repo: &RawRepository) -> bool {
    repo.web_url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .is_some_and(|u| u.host_str() == Some(TEST_EVENT_HOST))
}

impl EventParser {
    pub(super) fn parse_azure_devops(&self, payload: &[u8]) -> Result<ParsedWebhook> {
        let raw: RawEvent = serde_json::from_slice(payload)?;
        let event_type = raw.event_type.unwrap_or_default();
        match event_type.as_str() {
            PULL_CREATED | PULL_UPDATED => {
                let text = raw.message.and_then(|m| m.text).unwrap_or_default();
                if let Some(s) = IGNORED_UPDATE_MESSAGES.iter().find(|s| text.contains(*s)) {
                    return Ok(ParsedWebhook::Ignored(format!(
                        "pull request updated event is not a supported type [{}]",
                        s
                    )));
                }
                let resource: RawPullRequest =
                    serde_json::from_value(require(raw.resource, "resource")?)?;
                self.azure_pull_event(&event_type, resource)
            }
            PULL_COMMENTED => {
                let resource: RawCommentResource =
                    serde_json::from_value(require(raw.resource, "resource")?)?;
                self.azure_comment_event(resource)
            }
            other => Ok(ParsedWebhook::Ignored(format!(
                "Ignoring unsupported event: {}",
                other
            ))),
        }
    }

    fn azure_pull_event(
        &self,
        event_type: &str,
        resource: RawPullRequest,
    ) -> Result<ParsedWebhook> {
        if resource.repository.as_ref().is_some_and(is_test_event) {
            return Ok(ParsedWebhook::Ignored(format!(
                "Ignoring Azure DevOps Test Event with Repo URL: {}",
                resource
                    .repository
                    .as_ref()
                    .and_then(|r| r.web_url.as_deref())
                    .unwrap_or_default()
            )));
        }

        let (pull, head_repo) = self.azure_pull(resource)?;
        let event_type = match event_type {
            PULL_CREATED => PullRequestEventType::Opened,
            PULL_UPDATED if pull.state == PullRequestState::Closed => PullRequestEventType::Closed,
            PULL_UPDATED => PullRequestEventType::Updated,
            _ => PullRequestEventType::Other,
        };
        let user = User::new(pull.author.clone());
        Ok(ParsedWebhook::Event(VcsEvent::AzureDevopsPull(PullEvent {
            pull,
            head_repo,
            event_type,
            user,
        })))
    }

    fn azure_comment_event(&self, resource: RawCommentResource) -> Result<ParsedWebhook> {
        let Some(comment) = resource.comment else {
            return Ok(ParsedWebhook::ignored(
                "Ignoring comment event since no comment is linked to payload",
            ));
        };
        if comment.is_deleted {
            return Ok(ParsedWebhook::ignored(
                "Ignoring comment event since it is linked to deleting a pull request comment",
            ));
        }
        let Some(pr) = resource.pull_request else {
            return Ok(ParsedWebhook::ignored(
                "Ignoring comment event since no pull request is linked to payload",
            ));
        };
        if let Some(repo) = pr.repository.as_ref().filter(|r| is_test_event(r)) {
            return Ok(ParsedWebhook::Ignored(format!(
                "Ignoring Azure DevOps Test Event with Repo URL: {}",
                repo.web_url.as_deref().unwrap_or_default()
            )));
        }

        let commenter = comment.author.and_then(|a| a.unique_name);
        let text = strip_html(&comment.content.unwrap_or_default());
        let (pull, head_repo) = self.azure_pull(pr)?;
        let username = commenter.unwrap_or_else(|| pull.author.clone());

        Ok(ParsedWebhook::Event(VcsEvent::AzureDevopsComment(
            CommentEvent {
                base_repo: pull.base_repo.clone(),
                head_repo: Some(head_repo),
                pull_num: pull.num,
                pull: Some(pull),
                user: User::new(username),
                comment: text,
            },
        )))
    }

    fn azure_pull(&self, raw: RawPullRequest) -> Result<(PullRequest, Repo)> {
        let head_commit = require_str(
            raw.last_merge_source_commit.and_then(|c| c.commit_id),
            "lastMergeSourceCommit.commitID",
        )?;
        let url = require_str(raw.url, "url")?;
        let head_branch = require_str(raw.source_ref_name, "sourceRefName (branch name)")?;
        let base_branch = require_str(raw.target_ref_name, "targetRefName (branch name)")?;
        let num = require(raw.pull_request_id.filter(|n| *n != 0), "pullRequestId")?;
        let author = require_str(
            raw.created_by.and_then(|c| c.unique_name),
            "CreatedBy.UniqueName",
        )?;
        let base_repo = self.azure_repo(require(raw.repository, "repository")?)?;

        let state = if raw.status.as_deref() == Some("active") {
            PullRequestState::Open
        } else {
            PullRequestState::Closed
        };

        let pull = PullRequest {
            num: PullNum(num),
            head_commit: Sha::new(head_commit),
            url,
            head_branch: strip_ref(&head_branch),
            base_branch: strip_ref(&base_branch),
            author,
            state,
            base_repo: base_repo.clone(),
        };
        // Azure DevOps pull requests cannot come from forks of another
        // organization, so the head repo is the base repo.
        Ok((pull, base_repo))
    }

    /// Builds a repo from an Azure DevOps repository object. Without a parent
    /// repository, the owner (organization) comes from the web URL, which is
    /// either `https://{org}.visualstudio.com/...` or
    /// `https://dev.azure.com/{org}/...`.
    fn azure_repo(&self, raw: RawRepository) -> Result<Repo> {
        let web_url = require_str(raw.web_url, "repository.webUrl")?;
        let uri = Url::parse(&web_url).map_err(|_| super::ParseError::InvalidField {
            field: "repository.webUrl",
            value: web_url.clone(),
        })?;
        let host = uri.host_str().unwrap_or("dev.azure.com").to_string();

        let owner = match raw.parent_repository.and_then(|p| p.name) {
            Some(parent) => parent,
            None if host.contains("visualstudio.com") => {
                host.split('.').next().unwrap_or_default().to_string()
            }
            None => uri
                .path_segments()
                .and_then(|mut s| s.next())
                .unwrap_or_default()
                .to_string(),
        };
        let project = require_str(raw.project.and_then(|p| p.name), "repository.project.name")?;
        let name = require_str(raw.name, "repository.name")?;

        let clone_url = if host.contains("visualstudio.com") {
            format!("https://{}/{}/_git/{}", host, project, name)
        } else {
            format!("https://{}/{}/{}/_git/{}", host, owner, project, name)
        };
        let full_name = format!("{}/{}/{}", owner, project, name);
        Ok(Repo::new(
            VcsHostType::AzureDevops,
            &full_name,
            &clone_url,
            &self.azure_devops.user,
            &self.azure_devops.token,
        )?)
    }
}

fn strip_ref(branch: &str) -> String {
    branch.replacen("refs/heads/", "", 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::parser::test_support::parser;
    use serde_json::json;

    fn pull_resource(web_url: &str, status: &str) -> serde_json::Value {
        json!({
            "pullRequestId": 1,
            "status": status,
            "url": "https://dev.azure.com/owner/project/_apis/git/repositories/repo/pullRequests/1",
            "sourceRefName": "refs/heads/feature/sourceBranch",
            "targetRefName": "refs/heads/targetBranch",
            "lastMergeSourceCommit": { "commitId": "b60280bc6e62e2f880f1b63c1e24987664d3bda3" },
            "createdBy": { "uniqueName": "user@example.com" },
            "repository": {
                "name": "repo",
                "webUrl": web_url,
                "project": { "name": "project" }
            }
        })
    }

    fn pull_event(event_type: &str, status: &str, message: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "eventType": event_type,
            "message": { "text": message },
            "resource": pull_resource("https://dev.azure.com/owner/project/_git/repo", status)
        }))
        .unwrap()
    }

    fn parse_pull(bytes: &[u8]) -> PullEvent {
        match parser().parse_azure_devops(bytes).unwrap() {
            ParsedWebhook::Event(VcsEvent::AzureDevopsPull(p)) => p,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pull_event_fields() {
        let event = parse_pull(&pull_event(PULL_CREATED, "active", "created a pull request"));
        assert_eq!(event.event_type, PullRequestEventType::Opened);
        assert_eq!(event.pull.head_branch, "feature/sourceBranch");
        assert_eq!(event.pull.base_branch, "targetBranch");
        assert_eq!(event.pull.base_repo.full_name, "owner/project/repo");
        assert_eq!(event.pull.base_repo.owner, "owner/project");
        assert_eq!(
            event.pull.base_repo.sanitized_clone_url,
            "https://azure-user:<redacted>@dev.azure.com/owner/project/_git/repo"
        );
        assert_eq!(event.user.username, "user@example.com");
    }

    #[test]
    fn updated_and_completed_is_closed() {
        let event = parse_pull(&pull_event(PULL_UPDATED, "completed", "completed"));
        assert_eq!(event.event_type, PullRequestEventType::Closed);
        let event = parse_pull(&pull_event(PULL_UPDATED, "active", "pushed"));
        assert_eq!(event.event_type, PullRequestEventType::Updated);
    }

    #[test]
    fn reviewer_updates_are_ignored() {
        let bytes = pull_event(PULL_UPDATED, "active", "Jane approved pull request 1");
        assert_eq!(
            parser().parse_azure_devops(&bytes).unwrap(),
            ParsedWebhook::ignored(
                "pull request updated event is not a supported type [approved pull request]"
            )
        );
    }

    #[test]
    fn visualstudio_owner_comes_from_subdomain() {
        let bytes = serde_json::to_vec(&json!({
            "eventType": PULL_CREATED,
            "resource": pull_resource("https://owner.visualstudio.com/project/_git/repo", "active")
        }))
        .unwrap();
        let event = parse_pull(&bytes);
        assert_eq!(event.pull.base_repo.full_name, "owner/project/repo");
        assert!(
            event
                .pull
                .base_repo
                .clone_url
                .ends_with("@owner.visualstudio.com/project/_git/repo")
        );
    }

    #[test]
    fn test_repo_events_are_ignored() {
        let bytes = serde_json::to_vec(&json!({
            "eventType": PULL_CREATED,
            "resource": pull_resource("https://fabrikam.visualstudio.com/DefaultCollection/_git/Fabrikam", "active")
        }))
        .unwrap();
        match parser().parse_azure_devops(&bytes).unwrap() {
            ParsedWebhook::Ignored(msg) => {
                assert!(msg.starts_with("Ignoring Azure DevOps Test Event with Repo URL: "))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comment_event_strips_html() {
        let bytes = serde_json::to_vec(&json!({
            "eventType": PULL_COMMENTED,
            "resource": {
                "comment": {
                    "content": "<p>atlantis plan -- -var=&quot;a&quot;</p>",
                    "author": { "uniqueName": "commenter@example.com" }
                },
                "pullRequest": pull_resource("https://dev.azure.com/owner/project/_git/repo", "active")
            }
        }))
        .unwrap();
        match parser().parse_azure_devops(&bytes).unwrap() {
            ParsedWebhook::Event(VcsEvent::AzureDevopsComment(c)) => {
                assert_eq!(c.comment, "atlantis plan -- -var=\"a\"");
                assert_eq!(c.user.username, "commenter@example.com");
                assert_eq!(c.pull_num, PullNum(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comment_without_comment_or_deleted_is_ignored() {
        let no_comment = serde_json::to_vec(&json!({
            "eventType": PULL_COMMENTED,
            "resource": {}
        }))
        .unwrap();
        assert_eq!(
            parser().parse_azure_devops(&no_comment).unwrap(),
            ParsedWebhook::ignored("Ignoring comment event since no comment is linked to payload")
        );

        let deleted = serde_json::to_vec(&json!({
            "eventType": PULL_COMMENTED,
            "resource": { "comment": { "content": "x", "isDeleted": true } }
        }))
        .unwrap();
        assert_eq!(
            parser().parse_azure_devops(&deleted).unwrap(),
            ParsedWebhook::ignored(
                "Ignoring comment event since it is linked to deleting a pull request comment"
            )
        );
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let bytes = br#"{"eventType":"workitem.created"}"#;
        assert_eq!(
            parser().parse_azure_devops(bytes).unwrap(),
            ParsedWebhook::ignored("Ignoring unsupported event: workitem.created")
        );
    }
}
