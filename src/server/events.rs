//! `POST /events`: webhooks from every VCS host.
//!
//! The host is recognised by its headers, the request is authenticated by the
//! host's validator and parsed into a canonical event. Comment commands and
//! autoplans are handed to the [`Dispatcher`](crate::dispatch::Dispatcher) so
//! the response goes back before the command finishes. Closed pull requests
//! are cleaned up before responding.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{Level, debug, error, info, instrument, warn};

use super::AppState;
use crate::commands::CommentParseResult;
use crate::types::{PullRequestEventType, VcsHostType};
use crate::webhooks::parser::{
    AZURE_DEVOPS_REQUEST_ID_HEADER, BITBUCKET_CLOUD_REQUEST_ID_HEADER, BITBUCKET_EVENT_TYPE_HEADER,
    BITBUCKET_SERVER_REQUEST_ID_HEADER, GITHUB_EVENT_HEADER, GITLAB_EVENT_HEADER,
};
use crate::webhooks::{
    BITBUCKET_SERVER_DIAGNOSTICS_PING, CommentEvent, EventKind, ParsedWebhook, PullEvent,
};

/// Posted on a pull request from a repo outside the allowlist.
pub const NOT_ALLOWLISTED_COMMENT: &str =
    "```\nError: This repo is not allowlisted for Atlantis.\n```";

/// Ignored comments are echoed back truncated to this many characters.
const IGNORED_COMMENT_PREVIEW: usize = 40;

/// Logs `message` at `level` and turns it into a plain-text response.
fn respond(level: Level, status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    match level {
        Level::ERROR => error!(status = status.as_u16(), "{}", message),
        Level::WARN => warn!(status = status.as_u16(), "{}", message),
        Level::INFO => info!(status = status.as_u16(), "{}", message),
        _ => debug!(status = status.as_u16(), "{}", message),
    }
    (status, message).into_response()
}

/// Which host sent the request, judged by its headers.
pub fn detect_host(headers: &HeaderMap) -> Option<VcsHostType> {
    let has = |name: &str| {
        headers
            .get(name)
            .is_some_and(|v| !v.as_bytes().is_empty())
    };
    if has(GITHUB_EVENT_HEADER) {
        Some(VcsHostType::Github)
    } else if has(GITLAB_EVENT_HEADER) {
        Some(VcsHostType::Gitlab)
    } else if has(BITBUCKET_EVENT_TYPE_HEADER) && has(BITBUCKET_CLOUD_REQUEST_ID_HEADER) {
        Some(VcsHostType::BitbucketCloud)
    } else if has(BITBUCKET_EVENT_TYPE_HEADER) && has(BITBUCKET_SERVER_REQUEST_ID_HEADER) {
        Some(VcsHostType::BitbucketServer)
    } else if has(AZURE_DEVOPS_REQUEST_ID_HEADER) {
        Some(VcsHostType::AzureDevops)
    } else {
        None
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 200 OK: Event accepted, ignored, or answered with a comment
/// - 400 Bad Request: Unknown or unsupported host, failed validation, or an
///   unparseable payload
/// - 401 Unauthorized: Azure DevOps basic auth mismatch
/// - 403 Forbidden: Repository is not allowlisted
/// - 500 Internal Server Error: Cleaning up a closed pull request failed
pub async fn events_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(host) = detect_host(&headers) else {
        return respond(Level::DEBUG, StatusCode::BAD_REQUEST, "Ignoring request");
    };
    if !app_state.supports(host) {
        return respond(
            Level::DEBUG,
            StatusCode::BAD_REQUEST,
            format!(
                "Ignoring request since not configured to support {}",
                host.display_name()
            ),
        );
    }
    handle_event(&app_state, host, &headers, &body).await
}

#[instrument(skip_all, fields(host = %host.display_name()))]
async fn handle_event(
    app_state: &AppState,
    host: VcsHostType,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let parts = app_state.parts();

    if host == VcsHostType::BitbucketServer {
        let key = headers
            .get(BITBUCKET_EVENT_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if key == BITBUCKET_SERVER_DIAGNOSTICS_PING {
            return respond(
                Level::INFO,
                StatusCode::OK,
                format!("Successfully received {} event", key),
            );
        }
    }

    let Some(validator) = parts.validators.get(host) else {
        return respond(Level::ERROR, StatusCode::BAD_REQUEST, "Ignoring request");
    };
    let payload = match validator.validate(headers, body) {
        Ok(payload) => payload,
        Err(e) if host == VcsHostType::AzureDevops => {
            return respond(Level::WARN, StatusCode::UNAUTHORIZED, e.to_string());
        }
        Err(e) => {
            return respond(
                Level::WARN,
                StatusCode::BAD_REQUEST,
                format!("request did not pass validation: {}", e),
            );
        }
    };

    let event = match parts.parser.parse(host, headers, &payload) {
        Ok(ParsedWebhook::Event(event)) => event,
        Ok(ParsedWebhook::Ignored(reason)) => {
            return respond(Level::DEBUG, StatusCode::OK, reason);
        }
        Err(e) => {
            return respond(
                Level::ERROR,
                StatusCode::BAD_REQUEST,
                format!("Error parsing webhook: {}", e),
            );
        }
    };

    match event.into_kind() {
        EventKind::Comment(comment) => handle_comment_event(app_state, host, comment).await,
        EventKind::Pull(pull) => handle_pull_event(app_state, pull).await,
    }
}

#[instrument(skip_all, fields(repo = %event.base_repo, pull = %event.pull_num))]
async fn handle_comment_event(
    app_state: &AppState,
    host: VcsHostType,
    event: CommentEvent,
) -> Response {
    let parts = app_state.parts();

    // Either a command to run or a canned reply to post.
    let parsed = match parts.comment_parser.parse(&event.comment, host) {
        CommentParseResult::Ignore => {
            return respond(
                Level::DEBUG,
                StatusCode::OK,
                format!("Ignoring non-command comment: {:?}", preview(&event.comment)),
            );
        }
        CommentParseResult::Response(text) => Err(text),
        CommentParseResult::Command(cmd) => Ok(cmd),
    };

    let base = &event.base_repo;
    if !parts
        .allowlist
        .is_allowlisted(&base.full_name, &base.vcs_host.hostname)
    {
        if !parts.silence_allowlist_errors {
            if let Err(e) = parts
                .vcs
                .create_comment(base, event.pull_num, NOT_ALLOWLISTED_COMMENT, "")
                .await
            {
                error!(error = %e, "Unable to comment on pull request");
            }
        }
        return respond(Level::WARN, StatusCode::FORBIDDEN, "Repo not allowlisted");
    }

    let cmd = match parsed {
        Ok(cmd) => cmd,
        Err(text) => {
            if let Err(e) = parts
                .vcs
                .create_comment(base, event.pull_num, &text, "")
                .await
            {
                error!(error = %e, "Unable to comment on pull request");
            }
            return respond(Level::INFO, StatusCode::OK, "Commenting back on pull request");
        }
    };

    info!(command = %cmd, "Running comment command");
    let runner = parts.runner.clone();
    parts
        .dispatcher
        .dispatch("comment_command", async move {
            runner
                .run_comment_command(
                    event.base_repo,
                    event.head_repo,
                    event.pull,
                    event.user,
                    event.pull_num,
                    cmd,
                )
                .await;
        })
        .await;
    respond(Level::INFO, StatusCode::OK, "Processing...")
}

#[instrument(
    skip_all,
    fields(repo = %event.pull.base_repo, pull = %event.pull.num, event = %event.event_type)
)]
async fn handle_pull_event(app_state: &AppState, event: PullEvent) -> Response {
    let parts = app_state.parts();
    let base = &event.pull.base_repo;

    if !parts
        .allowlist
        .is_allowlisted(&base.full_name, &base.vcs_host.hostname)
    {
        if event.event_type == PullRequestEventType::Opened && !parts.silence_allowlist_errors {
            if let Err(e) = parts
                .vcs
                .create_comment(base, event.pull.num, NOT_ALLOWLISTED_COMMENT, "")
                .await
            {
                error!(error = %e, "Unable to comment on pull request");
            }
        }
        return respond(
            Level::WARN,
            StatusCode::FORBIDDEN,
            format!(
                "Pull request event from non-allowlisted repo \"{}/{}\"",
                base.vcs_host.hostname, base.full_name
            ),
        );
    }

    match event.event_type {
        PullRequestEventType::Opened | PullRequestEventType::Updated => {
            info!("Running autoplan");
            let runner = parts.runner.clone();
            parts
                .dispatcher
                .dispatch("autoplan", async move {
                    let base_repo = event.pull.base_repo.clone();
                    runner
                        .run_autoplan_command(base_repo, event.head_repo, event.pull, event.user)
                        .await;
                })
                .await;
            respond(Level::INFO, StatusCode::OK, "Processing...")
        }
        PullRequestEventType::Closed => {
            match parts.cleaner.clean_up_pull(base, &event.pull).await {
                Ok(()) => respond(
                    Level::INFO,
                    StatusCode::OK,
                    "Pull request cleaned successfully",
                ),
                Err(e) => respond(
                    Level::ERROR,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error cleaning pull request: {}", e),
                ),
            }
        }
        PullRequestEventType::Other => respond(
            Level::DEBUG,
            StatusCode::OK,
            "Ignoring non-actionable pull request event",
        ),
    }
}

/// The first few characters of an ignored comment.
fn preview(comment: &str) -> String {
    if comment.chars().count() > IGNORED_COMMENT_PREVIEW {
        let head: String = comment.chars().take(IGNORED_COMMENT_PREVIEW).collect();
        format!("{}...", head)
    } else {
        comment.to_string()
    }
}
