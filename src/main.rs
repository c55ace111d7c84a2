use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use atlantis::allowlist::RepoAllowlistChecker;
use atlantis::cleaner::DefaultPullCleaner;
use atlantis::commands::CommentParser;
use atlantis::config::Config;
use atlantis::dispatch::Dispatcher;
use atlantis::drainer::Drainer;
use atlantis::git::{FileWorkingDir, WorkingDir};
use atlantis::locking::{ApplyLocker, ProjectLocker, WorkingDirLocker};
use atlantis::persistence::LockStore;
use atlantis::runner::{
    CommitStatusUpdater, DefaultCommandRunner, ProjectCommandBuilder, ProjectCommandRunner,
    Renderer, RunnerConfig, RunnerParts, TerraformStepRunner, WorkflowHooksRunner,
};
use atlantis::server::{AppState, ServerParts, Validators, build_router};
use atlantis::types::VcsHostType;
use atlantis::vcs::{GithubClient, ProxyClient, VcsClient};
use atlantis::webhooks::{
    AzureDevopsValidator, BitbucketServerValidator, Credentials, EventParser, GithubValidator,
    GitlabValidator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse().normalize();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    config.warn_insecure_webhooks();

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let store = Arc::new(LockStore::open(&data_dir).context("opening lock store")?);

    let mut proxy = ProxyClient::new();
    if !config.gh_user.is_empty() {
        let github = GithubClient::new(&config.gh_hostname, &config.gh_user, &config.gh_token)
            .context("building GitHub client")?;
        proxy = proxy.with_client(VcsHostType::Github, Arc::new(github));
    }
    let vcs: Arc<dyn VcsClient> = Arc::new(proxy);

    let working_dir: Arc<dyn WorkingDir> =
        Arc::new(FileWorkingDir::new(&data_dir, config.checkout_strategy));
    let dir_locker = WorkingDirLocker::new();
    let project_locker = ProjectLocker::new(store.clone(), vcs.clone());
    let apply_locker = ApplyLocker::new(store.clone(), config.disable_apply);
    let drainer = Drainer::new();
    let atlantis_url = config.atlantis_url();

    let mut steps = TerraformStepRunner::new(&config.tf_binary, &config.conftest_binary);
    if let Some(dir) = &config.policy_dir {
        steps = steps.with_policy_dir(dir);
    }

    let runner = DefaultCommandRunner::new(
        RunnerParts {
            vcs: vcs.clone(),
            builder: ProjectCommandBuilder::new(
                working_dir.clone(),
                dir_locker.clone(),
                vcs.clone(),
                store.clone(),
            )
            .with_global_requirements(config.global_requirements())
            .with_policy_checks(config.enable_policy_checks),
            project_runner: ProjectCommandRunner::new(
                working_dir.clone(),
                dir_locker.clone(),
                project_locker.clone(),
                apply_locker.clone(),
                Arc::new(steps),
                vcs.clone(),
            )
            .with_atlantis_url(&atlantis_url)
            .with_policy_owners(config.policy_owners.clone()),
            store: store.clone(),
            project_locker: project_locker.clone(),
            apply_locker: apply_locker.clone(),
            working_dir: working_dir.clone(),
            locker: dir_locker.clone(),
            status: CommitStatusUpdater::new(vcs.clone(), &atlantis_url),
            renderer: Renderer::new(config.disable_apply, config.disable_apply_all),
            hooks: WorkflowHooksRunner::new(
                config.pre_workflow_hooks.clone(),
                config.post_workflow_hooks.clone(),
                working_dir.clone(),
                dir_locker.clone(),
            ),
            drainer: drainer.clone(),
        },
        RunnerConfig {
            allow_fork_prs: config.allow_fork_prs,
            silence_fork_pr_errors: config.silence_fork_pr_errors,
            disable_apply_all: config.disable_apply_all,
            disable_autoplan: config.disable_autoplan,
            automerge: config.automerge,
            policy_checks_enabled: config.enable_policy_checks,
            parallel_pool_size: config.parallel_pool_size,
        },
    );

    let cleaner = DefaultPullCleaner::new(
        working_dir.clone(),
        dir_locker.clone(),
        project_locker.clone(),
        store.clone(),
        vcs.clone(),
    );

    let validators = Validators::unauthenticated()
        .with(
            VcsHostType::Github,
            Arc::new(GithubValidator::new(config.gh_webhook_secret.as_bytes())),
        )
        .with(
            VcsHostType::Gitlab,
            Arc::new(GitlabValidator::new(config.gitlab_webhook_secret.as_bytes())),
        )
        .with(
            VcsHostType::BitbucketServer,
            Arc::new(BitbucketServerValidator::new(
                config.bitbucket_webhook_secret.as_bytes(),
            )),
        )
        .with(
            VcsHostType::AzureDevops,
            Arc::new(AzureDevopsValidator::new(
                config.azuredevops_webhook_user.as_bytes(),
                config.azuredevops_webhook_password.as_bytes(),
            )),
        );

    let parser = EventParser::new()
        .with_github(Credentials::new(&config.gh_user, &config.gh_token))
        .with_gitlab(Credentials::new(&config.gitlab_user, &config.gitlab_token))
        .with_bitbucket(
            Credentials::new(&config.bitbucket_user, &config.bitbucket_token),
            &config.bitbucket_base_url,
        )
        .with_azure_devops(Credentials::new(
            &config.azuredevops_user,
            &config.azuredevops_token,
        ))
        .with_allow_draft_prs(config.allow_draft_prs);

    let allowlist = RepoAllowlistChecker::new(config.repo_allowlist.as_deref().unwrap_or_default())
        .context("parsing --repo-allowlist")?;

    let dispatcher = Dispatcher::new(config.max_concurrent_commands);
    let app_state = AppState::new(ServerParts {
        supported_hosts: config.supported_hosts(),
        validators,
        parser,
        comment_parser: CommentParser {
            github_user: config.gh_user.clone(),
            gitlab_user: config.gitlab_user.clone(),
            bitbucket_user: config.bitbucket_user.clone(),
            azure_devops_user: config.azuredevops_user.clone(),
            apply_disabled: config.disable_apply,
        },
        allowlist,
        silence_allowlist_errors: config.silence_allowlist_errors,
        runner: Arc::new(runner),
        cleaner: Arc::new(cleaner),
        vcs,
        dispatcher: dispatcher.clone(),
        drainer: drainer.clone(),
        project_locker,
        apply_locker,
        working_dir,
        dir_locker,
        store,
    });
    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, url = %atlantis_url, "Atlantis started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    drainer.shutdown_blocking().await;
    dispatcher.wait().await;
    info!("Atlantis server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
