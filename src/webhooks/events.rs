//! Canonical webhook events.
//!
//! The parser translates every provider payload into one of these variants.
//! Variants carry only canonical fields, never the provider's raw shape, so
//! everything downstream of the parser is provider-agnostic apart from the
//! host type tag.

use crate::types::{PullNum, PullRequest, PullRequestEventType, Repo, User, VcsHostType};

/// A comment left on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEvent {
    pub base_repo: Repo,

    /// The repository holding the pull request's head branch. Absent when the
    /// provider's comment payload does not include it (GitHub), in which case
    /// the pull request is fetched from the API before any command runs.
    pub head_repo: Option<Repo>,

    /// The pull request, when the payload carries enough to build it.
    pub pull: Option<PullRequest>,

    pub pull_num: PullNum,

    /// The commenter.
    pub user: User,

    /// Raw comment text.
    pub comment: String,
}

/// A pull request lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullEvent {
    pub pull: PullRequest,
    pub head_repo: Repo,
    pub event_type: PullRequestEventType,
    /// The user who triggered the event.
    pub user: User,
}

/// A parsed, authenticated webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsEvent {
    GithubComment(CommentEvent),
    GithubPull(PullEvent),
    GitlabComment(CommentEvent),
    GitlabPull(PullEvent),
    BitbucketCloudComment(CommentEvent),
    BitbucketCloudPull(PullEvent),
    BitbucketServerComment(CommentEvent),
    BitbucketServerPull(PullEvent),
    AzureDevopsComment(CommentEvent),
    AzureDevopsPull(PullEvent),
}

impl VcsEvent {
    /// The VCS host this event came from.
    pub fn host_type(&self) -> VcsHostType {
        match self {
            VcsEvent::GithubComment(_) | VcsEvent::GithubPull(_) => VcsHostType::Github,
            VcsEvent::GitlabComment(_) | VcsEvent::GitlabPull(_) => VcsHostType::Gitlab,
            VcsEvent::BitbucketCloudComment(_) | VcsEvent::BitbucketCloudPull(_) => {
                VcsHostType::BitbucketCloud
            }
            VcsEvent::BitbucketServerComment(_) | VcsEvent::BitbucketServerPull(_) => {
                VcsHostType::BitbucketServer
            }
            VcsEvent::AzureDevopsComment(_) | VcsEvent::AzureDevopsPull(_) => {
                VcsHostType::AzureDevops
            }
        }
    }

    /// Wraps a comment event in the variant for `host`.
    pub fn comment(host: VcsHostType, event: CommentEvent) -> Self {
        match host {
            VcsHostType::Github => VcsEvent::GithubComment(event),
            VcsHostType::Gitlab => VcsEvent::GitlabComment(event),
            VcsHostType::BitbucketCloud => VcsEvent::BitbucketCloudComment(event),
            VcsHostType::BitbucketServer => VcsEvent::BitbucketServerComment(event),
            VcsHostType::AzureDevops => VcsEvent::AzureDevopsComment(event),
        }
    }

    /// Wraps a pull request event in the variant for `host`.
    pub fn pull(host: VcsHostType, event: PullEvent) -> Self {
        match host {
            VcsHostType::Github => VcsEvent::GithubPull(event),
            VcsHostType::Gitlab => VcsEvent::GitlabPull(event),
            VcsHostType::BitbucketCloud => VcsEvent::BitbucketCloudPull(event),
            VcsHostType::BitbucketServer => VcsEvent::BitbucketServerPull(event),
            VcsHostType::AzureDevops => VcsEvent::AzureDevopsPull(event),
        }
    }

    /// Splits into the comment or pull request payload.
    pub fn into_kind(self) -> EventKind {
        match self {
            VcsEvent::GithubComment(c)
            | VcsEvent::GitlabComment(c)
            | VcsEvent::BitbucketCloudComment(c)
            | VcsEvent::BitbucketServerComment(c)
            | VcsEvent::AzureDevopsComment(c) => EventKind::Comment(c),
            VcsEvent::GithubPull(p)
            | VcsEvent::GitlabPull(p)
            | VcsEvent::BitbucketCloudPull(p)
            | VcsEvent::BitbucketServerPull(p)
            | VcsEvent::AzureDevopsPull(p) => EventKind::Pull(p),
        }
    }
}

/// Provider-independent view of a [`VcsEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Comment(CommentEvent),
    Pull(PullEvent),
}

/// What the parser made of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedWebhook {
    /// An event that should be handled.
    Event(VcsEvent),

    /// A well-formed request deliberately not handled. The message is
    /// returned to the caller with 200 OK.
    Ignored(String),
}

impl ParsedWebhook {
    pub fn ignored(message: impl Into<String>) -> Self {
        ParsedWebhook::Ignored(message.into())
    }
}
