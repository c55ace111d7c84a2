//! Routes VCS calls to the client for each repository's host.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::{Result, VcsError};
use super::{CommitStatus, VcsClient};
use crate::types::{PullNum, PullRequest, Repo, VcsHostType};

/// A [`VcsClient`] that dispatches on `repo.vcs_host.host_type`.
#[derive(Default, Clone)]
pub struct ProxyClient {
    clients: HashMap<VcsHostType, Arc<dyn VcsClient>>,
}

impl ProxyClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, host: VcsHostType, client: Arc<dyn VcsClient>) -> Self {
        self.clients.insert(host, client);
        self
    }

    fn client(&self, host: VcsHostType) -> Result<&Arc<dyn VcsClient>> {
        self.clients
            .get(&host)
            .ok_or_else(|| VcsError::not_configured(host))
    }
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("hosts", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl VcsClient for ProxyClient {
    async fn get_pull_request(&self, repo: &Repo, num: PullNum) -> Result<(PullRequest, Repo)> {
        self.client(repo.vcs_host.host_type)?
            .get_pull_request(repo, num)
            .await
    }

    async fn get_modified_files(&self, repo: &Repo, pull: &PullRequest) -> Result<Vec<String>> {
        self.client(repo.vcs_host.host_type)?
            .get_modified_files(repo, pull)
            .await
    }

    async fn create_comment(
        &self,
        repo: &Repo,
        pull_num: PullNum,
        comment: &str,
        command: &str,
    ) -> Result<()> {
        self.client(repo.vcs_host.host_type)?
            .create_comment(repo, pull_num, comment, command)
            .await
    }

    async fn pull_is_approved(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        self.client(repo.vcs_host.host_type)?
            .pull_is_approved(repo, pull)
            .await
    }

    async fn pull_is_mergeable(&self, repo: &Repo, pull: &PullRequest) -> Result<bool> {
        self.client(repo.vcs_host.host_type)?
            .pull_is_mergeable(repo, pull)
            .await
    }

    async fn update_status(
        &self,
        repo: &Repo,
        pull: &PullRequest,
        state: CommitStatus,
        src: &str,
        description: &str,
        url: &str,
    ) -> Result<()> {
        self.client(repo.vcs_host.host_type)?
            .update_status(repo, pull, state, src, description, url)
            .await
    }

    async fn merge_pull(&self, pull: &PullRequest) -> Result<()> {
        self.client(pull.base_repo.vcs_host.host_type)?
            .merge_pull(pull)
            .await
    }

    fn markdown_pull_link(&self, pull: &PullRequest) -> String {
        match self.clients.get(&pull.base_repo.vcs_host.host_type) {
            Some(client) => client.markdown_pull_link(pull),
            None => pull.url.clone(),
        }
    }
}
