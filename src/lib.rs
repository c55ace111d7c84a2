//! Atlantis - Terraform pull request automation.
//!
//! Webhooks from GitHub, GitLab, Bitbucket Cloud/Server and Azure DevOps are
//! normalised into canonical events, comment commands are parsed, and each
//! command is expanded into per-project plan/apply runs whose results are
//! commented back on the pull request.

pub mod allowlist;
pub mod cleaner;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod drainer;
pub mod git;
pub mod locking;
pub mod persistence;
pub mod runner;
pub mod server;
pub mod types;
pub mod vcs;
pub mod webhooks;

#[cfg(test)]
mod test_utils;
