//! HTTP server.
//!
//! # Endpoints
//!
//! - `POST /events` - Webhooks from every supported VCS host
//! - `GET /healthz` - Liveness check
//! - `GET /status` - Drain status
//! - `GET /locks` - Project locks as JSON
//! - `DELETE /locks?id=<key>` - Deletes a lock and discards its plan
//! - `POST /apply/lock`, `DELETE /apply/unlock` - The global apply lock

use std::collections::HashMap;
use std::sync::Arc;

pub mod events;
pub mod health;
pub mod locks;

pub use events::events_handler;
pub use health::{healthz_handler, status_handler};
pub use locks::{delete_lock_handler, list_locks_handler, lock_apply_handler, unlock_apply_handler};

use crate::allowlist::RepoAllowlistChecker;
use crate::cleaner::PullCleaner;
use crate::commands::CommentParser;
use crate::dispatch::Dispatcher;
use crate::drainer::Drainer;
use crate::git::WorkingDir;
use crate::locking::{ApplyLocker, ProjectLocker, WorkingDirLocker};
use crate::persistence::LockStore;
use crate::runner::CommandRunner;
use crate::types::VcsHostType;
use crate::vcs::VcsClient;
use crate::webhooks::{
    AzureDevopsValidator, BitbucketCloudValidator, BitbucketServerValidator, EventParser,
    GithubValidator, GitlabValidator, RequestValidator,
};

/// One request validator per VCS host.
#[derive(Clone)]
pub struct Validators {
    by_host: HashMap<VcsHostType, Arc<dyn RequestValidator>>,
}

impl Validators {
    /// Validators that accept every request (no secrets configured).
    pub fn unauthenticated() -> Self {
        let mut by_host: HashMap<VcsHostType, Arc<dyn RequestValidator>> = HashMap::new();
        by_host.insert(VcsHostType::Github, Arc::new(GithubValidator::default()));
        by_host.insert(VcsHostType::Gitlab, Arc::new(GitlabValidator::default()));
        by_host.insert(VcsHostType::BitbucketCloud, Arc::new(BitbucketCloudValidator));
        by_host.insert(
            VcsHostType::BitbucketServer,
            Arc::new(BitbucketServerValidator::default()),
        );
        by_host.insert(VcsHostType::AzureDevops, Arc::new(AzureDevopsValidator::default()));
        Validators { by_host }
    }

    pub fn with(mut self, host: VcsHostType, validator: Arc<dyn RequestValidator>) -> Self {
        self.by_host.insert(host, validator);
        self
    }

    pub fn get(&self, host: VcsHostType) -> Option<&Arc<dyn RequestValidator>> {
        self.by_host.get(&host)
    }
}

/// Everything the handlers need.
pub struct ServerParts {
    pub supported_hosts: Vec<VcsHostType>,
    pub validators: Validators,
    pub parser: EventParser,
    pub comment_parser: CommentParser,
    pub allowlist: RepoAllowlistChecker,
    pub silence_allowlist_errors: bool,
    pub runner: Arc<dyn CommandRunner>,
    pub cleaner: Arc<dyn PullCleaner>,
    pub vcs: Arc<dyn VcsClient>,
    pub dispatcher: Dispatcher,
    pub drainer: Drainer,
    pub project_locker: ProjectLocker,
    pub apply_locker: ApplyLocker,
    pub working_dir: Arc<dyn WorkingDir>,
    pub dir_locker: WorkingDirLocker,
    pub store: Arc<LockStore>,
}

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<ServerParts>,
}

impl AppState {
    pub fn new(parts: ServerParts) -> Self {
        AppState {
            inner: Arc::new(parts),
        }
    }

    pub(crate) fn parts(&self) -> &ServerParts {
        &self.inner
    }

    pub fn supports(&self, host: VcsHostType) -> bool {
        self.inner.supported_hosts.contains(&host)
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{delete, get, post};

    axum::Router::new()
        .route("/events", post(events_handler))
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .route("/locks", get(list_locks_handler).delete(delete_lock_handler))
        .route("/apply/lock", post(lock_apply_handler))
        .route("/apply/unlock", delete(unlock_apply_handler))
        .with_state(app_state)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! An [`AppState`] wired to recording fakes.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::cleaner::CleanupError;
    use crate::commands::CommentCommand;
    use crate::runner::test_support::PreparedWorkingDir;
    use crate::test_utils::FakeVcs;
    use crate::types::{PullNum, PullRequest, Repo, User};
    use crate::webhooks::parser::test_support::parser;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Ran {
        Comment { repo: String, pull: PullNum, cmd: CommentCommand },
        Autoplan { repo: String, pull: PullNum },
    }

    #[derive(Debug, Default)]
    pub struct RecordingRunner {
        pub ran: Mutex<Vec<Ran>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run_comment_command(
            &self,
            base_repo: Repo,
            _head_repo: Option<Repo>,
            _pull: Option<PullRequest>,
            _user: User,
            pull_num: PullNum,
            cmd: CommentCommand,
        ) {
            self.ran.lock().unwrap().push(Ran::Comment {
                repo: base_repo.full_name,
                pull: pull_num,
                cmd,
            });
        }

        async fn run_autoplan_command(
            &self,
            base_repo: Repo,
            _head_repo: Repo,
            pull: PullRequest,
            _user: User,
        ) {
            self.ran.lock().unwrap().push(Ran::Autoplan {
                repo: base_repo.full_name,
                pull: pull.num,
            });
        }
    }

    #[derive(Debug, Default)]
    pub struct RecordingCleaner {
        pub cleaned: Mutex<Vec<(String, PullNum)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl PullCleaner for RecordingCleaner {
        async fn clean_up_pull(&self, repo: &Repo, pull: &PullRequest) -> Result<(), CleanupError> {
            if self.fail {
                return Err(CleanupError::WorkingDir(crate::git::GitError::Io(
                    std::io::Error::other("disk gone"),
                )));
            }
            self.cleaned
                .lock()
                .unwrap()
                .push((repo.full_name.clone(), pull.num));
            Ok(())
        }
    }

    pub struct TestServer {
        pub data: TempDir,
        pub runner: Arc<RecordingRunner>,
        pub cleaner: Arc<RecordingCleaner>,
        pub vcs: Arc<FakeVcs>,
        pub store: Arc<LockStore>,
        pub dir_locker: WorkingDirLocker,
        pub drainer: Drainer,
        pub app: axum::Router,
    }

    impl TestServer {
        pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, String::from_utf8(body.to_vec()).unwrap())
        }

        pub fn ran(&self) -> Vec<Ran> {
            self.runner.ran.lock().unwrap().clone()
        }
    }

    pub struct Options {
        pub supported_hosts: Vec<VcsHostType>,
        pub allowlist: &'static str,
        pub validators: Validators,
        pub apply_disabled: bool,
        pub fail_cleanup: bool,
    }

    impl Default for Options {
        fn default() -> Self {
            Options {
                supported_hosts: VcsHostType::ALL.to_vec(),
                allowlist: "*",
                validators: Validators::unauthenticated(),
                apply_disabled: false,
                fail_cleanup: false,
            }
        }
    }

    pub fn server(options: Options) -> TestServer {
        let data = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let cleaner = Arc::new(RecordingCleaner {
            fail: options.fail_cleanup,
            ..RecordingCleaner::default()
        });
        let vcs = Arc::new(FakeVcs::default());
        let dyn_vcs: Arc<dyn VcsClient> = vcs.clone();
        let store = Arc::new(LockStore::in_memory());
        let dir_locker = WorkingDirLocker::new();
        let drainer = Drainer::new();

        let state = AppState::new(ServerParts {
            supported_hosts: options.supported_hosts,
            validators: options.validators,
            parser: parser(),
            comment_parser: CommentParser {
                github_user: "github-user".into(),
                gitlab_user: "gitlab-user".into(),
                bitbucket_user: "bitbucket-user".into(),
                azure_devops_user: "azure-user".into(),
                apply_disabled: false,
            },
            allowlist: RepoAllowlistChecker::new(options.allowlist).unwrap(),
            silence_allowlist_errors: false,
            runner: runner.clone(),
            cleaner: cleaner.clone(),
            vcs: dyn_vcs.clone(),
            dispatcher: Dispatcher::testing(),
            drainer: drainer.clone(),
            project_locker: ProjectLocker::new(store.clone(), dyn_vcs),
            apply_locker: ApplyLocker::new(store.clone(), options.apply_disabled),
            working_dir: Arc::new(PreparedWorkingDir::new(data.path())),
            dir_locker: dir_locker.clone(),
            store: store.clone(),
        });
        TestServer {
            data,
            runner,
            cleaner,
            vcs,
            store,
            dir_locker,
            drainer,
            app: build_router(state),
        }
    }
}
