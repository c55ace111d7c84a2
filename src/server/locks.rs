//! Lock management endpoints.
//!
//! Deleting a project lock also deletes that workspace's clone and marks
//! its plan as discarded, so the pull request has to plan again before it
//! can apply.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::AppState;
use crate::types::{ProjectLock, ProjectPlanStatus};

/// One entry of `GET /locks`.
#[derive(Debug, Serialize)]
pub struct LockSummary {
    pub id: String,
    pub repo_full_name: String,
    pub path: String,
    pub workspace: String,
    pub pull_num: u64,
    pub pull_url: String,
    pub user: String,
    pub time: DateTime<Utc>,
}

impl LockSummary {
    fn new(id: String, lock: ProjectLock) -> Self {
        LockSummary {
            id,
            repo_full_name: lock.project.repo_full_name,
            path: lock.project.path,
            workspace: lock.workspace,
            pull_num: lock.pull.num.0,
            pull_url: lock.pull.url,
            user: lock.user.username,
            time: lock.time,
        }
    }
}

pub async fn list_locks_handler(State(app_state): State<AppState>) -> Json<Vec<LockSummary>> {
    let locks = app_state
        .parts()
        .project_locker
        .list()
        .into_iter()
        .map(|(id, lock)| LockSummary::new(id, lock))
        .collect();
    Json(locks)
}

#[derive(Debug, Deserialize)]
pub struct LockQuery {
    pub id: Option<String>,
}

/// Discarded-plan notice posted on the pull request that held the lock.
fn discarded_comment(lock: &ProjectLock) -> String {
    format!(
        "**Warning**: The plan for dir: `{}` workspace: `{}` was **discarded** via the Atlantis UI.\n\nTo `apply` this plan you must run `plan` again.",
        lock.project.path, lock.workspace
    )
}

/// `DELETE /locks?id=<key>`
///
/// # Response
///
/// - 200 OK: Lock deleted
/// - 400 Bad Request: No `id` given
/// - 404 Not Found: No lock with that id
/// - 409 Conflict: A command is running in the lock's workspace
/// - 500 Internal Server Error: The lock store failed
#[instrument(skip_all)]
pub async fn delete_lock_handler(
    State(app_state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> Response {
    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "No lock id in request").into_response();
    };
    let parts = app_state.parts();

    let Some(held) = parts.project_locker.get(&id) else {
        return (StatusCode::NOT_FOUND, format!("No lock found at id {:?}", id)).into_response();
    };
    // The workspace's clone is deleted below, so no command may be using it.
    let _wd_lock = match parts.dir_locker.try_lock(
        &held.pull.base_repo.full_name,
        held.pull.num,
        &held.workspace,
    ) {
        Ok(lock) => lock,
        Err(e) => {
            info!(id = %id, error = %e, "Lock is in use");
            return (
                StatusCode::CONFLICT,
                format!("deleting lock failed with: {}", e),
            )
                .into_response();
        }
    };

    let lock = match parts.project_locker.unlock(&id) {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, format!("No lock found at id {:?}", id))
                .into_response();
        }
        Err(e) => {
            error!(id = %id, error = %e, "Deleting lock failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("deleting lock failed with: {}", e),
            )
                .into_response();
        }
    };

    let repo = &lock.pull.base_repo;
    if let Err(e) = parts
        .working_dir
        .delete_for_workspace(repo, lock.pull.num, &lock.workspace)
        .await
    {
        warn!(error = %e, "Unable to delete workspace");
    }
    if let Err(e) = parts.store.update_project_status(
        &lock.pull,
        &lock.workspace,
        &lock.project.path,
        ProjectPlanStatus::PlanDiscarded,
    ) {
        warn!(error = %e, "Unable to mark plan as discarded");
    }
    if let Err(e) = parts
        .vcs
        .create_comment(repo, lock.pull.num, &discarded_comment(&lock), "")
        .await
    {
        warn!(error = %e, "Unable to comment on pull request");
    }

    info!(id = %id, pull = %lock.pull.num, "Deleted lock");
    (StatusCode::OK, format!("Deleted lock id {:?}", id)).into_response()
}

/// `POST /apply/lock`
pub async fn lock_apply_handler(State(app_state): State<AppState>) -> Response {
    match app_state.parts().apply_locker.lock_apply() {
        Ok(lock) => (
            StatusCode::OK,
            format!("Apply Lock is acquired on {}", lock.time.to_rfc3339()),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Creating apply lock failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("creating apply lock failed with: {}", e),
            )
                .into_response()
        }
    }
}

/// `DELETE /apply/unlock`
pub async fn unlock_apply_handler(State(app_state): State<AppState>) -> Response {
    match app_state.parts().apply_locker.unlock_apply() {
        Ok(()) => (StatusCode::OK, "Deleted apply lock").into_response(),
        Err(e) => {
            error!(error = %e, "Deleting apply lock failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("deleting apply lock failed with: {}", e),
            )
                .into_response()
        }
    }
}
