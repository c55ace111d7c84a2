//! The lock store: project locks, pull statuses and the apply lock.
//!
//! The store keeps the whole [`StoreDocument`] in memory behind a mutex and
//! rewrites the file on every mutation while still holding the mutex, so
//! each operation is atomic with respect to both other callers and crashes.
//! A mutation is applied to a copy first; if saving fails, the in-memory
//! state is left unchanged.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;

use super::document::{Result, StoreDocument, load_or_default, save_document};
use crate::types::{
    CommandLock, ProjectLock, ProjectPlanStatus, ProjectStatus, PullNum, PullRequest, PullStatus,
    pull_key,
};

/// File name of the store within the data directory.
pub const STORE_FILE_NAME: &str = "atlantis.db";

/// Outcome of [`LockStore::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAttempt {
    pub acquired: bool,
    /// The lock now held: the new one, or the existing holder's.
    pub current: ProjectLock,
    pub key: String,
}

#[derive(Debug)]
pub struct LockStore {
    /// `None` keeps the store in memory only.
    path: Option<PathBuf>,
    doc: Mutex<StoreDocument>,
}

impl LockStore {
    /// Opens the store at `{data_dir}/atlantis.db`, creating an empty one if
    /// the file doesn't exist.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(STORE_FILE_NAME);
        let doc = load_or_default(&path)?;
        debug!(path = %path.display(), locks = doc.locks.len(), "Opened lock store");
        Ok(LockStore {
            path: Some(path),
            doc: Mutex::new(doc),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        LockStore {
            path: None,
            doc: Mutex::new(StoreDocument::default()),
        }
    }

    fn read(&self) -> MutexGuard<'_, StoreDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> Result<T> {
        let mut guard = self.read();
        let mut next = guard.clone();
        let out = f(&mut next);
        if next != *guard {
            next.saved_at = Utc::now();
            if let Some(path) = &self.path {
                save_document(path, &next)?;
            }
            *guard = next;
        }
        Ok(out)
    }

    // ─── Project locks ───

    /// Takes the lock for `lock.project` and `lock.workspace` unless another
    /// pull request holds it. A pull request re-acquires its own lock.
    pub fn try_lock(&self, lock: ProjectLock) -> Result<LockAttempt> {
        let key = lock.key();
        self.mutate(|doc| match doc.locks.get(&key) {
            Some(existing) => LockAttempt {
                acquired: existing.pull.num == lock.pull.num
                    && existing.pull.base_repo.full_name == lock.pull.base_repo.full_name,
                current: existing.clone(),
                key: key.clone(),
            },
            None => {
                doc.locks.insert(key.clone(), lock.clone());
                LockAttempt {
                    acquired: true,
                    current: lock,
                    key: key.clone(),
                }
            }
        })
    }

    /// Deletes one lock, returning it if it existed.
    pub fn unlock(&self, key: &str) -> Result<Option<ProjectLock>> {
        self.mutate(|doc| doc.locks.remove(key))
    }

    /// Deletes every lock held by a pull request.
    pub fn unlock_by_pull(&self, repo_full_name: &str, num: PullNum) -> Result<Vec<ProjectLock>> {
        self.mutate(|doc| {
            let keys: Vec<String> = doc
                .locks
                .iter()
                .filter(|(_, l)| l.pull.num == num && l.project.repo_full_name == repo_full_name)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| doc.locks.remove(k)).collect()
        })
    }

    pub fn get_lock(&self, key: &str) -> Option<ProjectLock> {
        self.read().locks.get(key).cloned()
    }

    /// All locks, ordered by key.
    pub fn list(&self) -> Vec<(String, ProjectLock)> {
        self.read()
            .locks
            .iter()
            .map(|(k, l)| (k.clone(), l.clone()))
            .collect()
    }

    // ─── Apply lock ───

    pub fn lock_apply(&self) -> Result<CommandLock> {
        self.mutate(|doc| {
            let lock = CommandLock {
                locked: true,
                time: Utc::now(),
            };
            doc.apply_lock = Some(lock.clone());
            lock
        })
    }

    pub fn unlock_apply(&self) -> Result<()> {
        self.mutate(|doc| {
            doc.apply_lock = None;
        })
    }

    pub fn apply_lock(&self) -> Option<CommandLock> {
        self.read().apply_lock.clone()
    }

    // ─── Pull statuses ───

    /// Records the statuses of the projects a command just ran for.
    ///
    /// If the stored status is for an older head commit it is replaced
    /// outright. Otherwise the new statuses are merged in, so that applying
    /// one project keeps the status of the others.
    pub fn update_pull_with_results(
        &self,
        pull: &PullRequest,
        results: Vec<ProjectStatus>,
    ) -> Result<PullStatus> {
        let key = pull_key(&pull.base_repo, pull.num);
        self.mutate(|doc| {
            let status = match doc.pulls.get(&key) {
                Some(current) if current.pull.head_commit == pull.head_commit => {
                    let mut merged = current.projects.clone();
                    for result in results {
                        match merged.iter_mut().find(|p| p.same_project(&result)) {
                            Some(existing) => existing.status = result.status,
                            None => merged.push(result),
                        }
                    }
                    PullStatus {
                        pull: pull.clone(),
                        projects: merged,
                    }
                }
                _ => PullStatus {
                    pull: pull.clone(),
                    projects: results,
                },
            };
            doc.pulls.insert(key.clone(), status.clone());
            status
        })
    }

    pub fn get_pull_status(&self, pull: &PullRequest) -> Option<PullStatus> {
        self.read()
            .pulls
            .get(&pull_key(&pull.base_repo, pull.num))
            .cloned()
    }

    pub fn delete_pull_status(&self, pull: &PullRequest) -> Result<()> {
        let key = pull_key(&pull.base_repo, pull.num);
        self.mutate(|doc| {
            doc.pulls.remove(&key);
        })
    }

    /// Sets the status of one project, e.g. to `plan_discarded` when its lock
    /// is deleted. Unknown projects are left alone.
    pub fn update_project_status(
        &self,
        pull: &PullRequest,
        workspace: &str,
        repo_rel_dir: &str,
        status: ProjectPlanStatus,
    ) -> Result<()> {
        let key = pull_key(&pull.base_repo, pull.num);
        self.mutate(|doc| {
            if let Some(pull_status) = doc.pulls.get_mut(&key) {
                for project in pull_status
                    .projects
                    .iter_mut()
                    .filter(|p| p.workspace == workspace && p.repo_rel_dir == repo_rel_dir)
                {
                    project.status = status;
                }
            }
        })
    }
}
