//! Server configuration.
//!
//! Every flag can also be set through an `ATLANTIS_*` environment variable.
//! [`Config::validate`] enforces the rules clap can't express, such as
//! user/token pairs.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;
use tracing::warn;

use crate::git::CheckoutStrategy;
use crate::runner::ApplyRequirement;
use crate::types::VcsHostType;

pub const DEFAULT_BITBUCKET_BASE_URL: &str = "https://api.bitbucket.org";
pub const VALID_LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: must be one of debug, info, warn or error")]
    InvalidLogLevel,

    #[error(
        "--gh-user/--gh-token or --gitlab-user/--gitlab-token or --bitbucket-user/--bitbucket-token or --azuredevops-user/--azuredevops-token must be set"
    )]
    NoVcsConfigured,

    #[error("--repo-allowlist must be set for security purposes")]
    MissingAllowlist,

    #[error("--repo-allowlist cannot contain ://, should be hostnames only")]
    AllowlistScheme,

    #[error(
        "--bitbucket-webhook-secret cannot be specified for Bitbucket Cloud because it is not supported by Bitbucket"
    )]
    BitbucketCloudSecret,

    #[error("error parsing --bitbucket-base-url flag value {url:?}: {reason}")]
    InvalidBitbucketUrl { url: String, reason: String },

    #[error("--bitbucket-base-url must have http:// or https://, got {0:?}")]
    BitbucketUrlScheme(String),
}

#[derive(Debug, Clone, Parser)]
#[command(name = "atlantis")]
#[command(version, about = "Terraform pull request automation")]
pub struct Config {
    /// Port to bind to.
    #[arg(long, env = "ATLANTIS_PORT", default_value_t = 4141)]
    pub port: u16,

    /// Where clones, plans and the lock store live.
    #[arg(long, env = "ATLANTIS_DATA_DIR", default_value = "~/.atlantis")]
    pub data_dir: String,

    /// One of debug, info, warn or error.
    #[arg(long, env = "ATLANTIS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// URL Atlantis is reachable at, used in lock links and commit statuses.
    /// Defaults to `http://localhost:{port}`.
    #[arg(long, env = "ATLANTIS_ATLANTIS_URL")]
    pub atlantis_url: Option<String>,

    /// Comma-separated `{hostname}/{owner}/{repo}` rules; `*` matches anything.
    #[arg(long, env = "ATLANTIS_REPO_ALLOWLIST")]
    pub repo_allowlist: Option<String>,

    // ─── GitHub ───
    #[arg(long, env = "ATLANTIS_GH_USER", default_value = "")]
    pub gh_user: String,

    #[arg(long, env = "ATLANTIS_GH_TOKEN", default_value = "", hide_env_values = true)]
    pub gh_token: String,

    #[arg(long, env = "ATLANTIS_GH_WEBHOOK_SECRET", default_value = "", hide_env_values = true)]
    pub gh_webhook_secret: String,

    #[arg(long, env = "ATLANTIS_GH_HOSTNAME", default_value = "github.com")]
    pub gh_hostname: String,

    // ─── GitLab ───
    #[arg(long, env = "ATLANTIS_GITLAB_USER", default_value = "")]
    pub gitlab_user: String,

    #[arg(long, env = "ATLANTIS_GITLAB_TOKEN", default_value = "", hide_env_values = true)]
    pub gitlab_token: String,

    #[arg(long, env = "ATLANTIS_GITLAB_WEBHOOK_SECRET", default_value = "", hide_env_values = true)]
    pub gitlab_webhook_secret: String,

    #[arg(long, env = "ATLANTIS_GITLAB_HOSTNAME", default_value = "gitlab.com")]
    pub gitlab_hostname: String,

    // ─── Bitbucket ───
    #[arg(long, env = "ATLANTIS_BITBUCKET_USER", default_value = "")]
    pub bitbucket_user: String,

    #[arg(long, env = "ATLANTIS_BITBUCKET_TOKEN", default_value = "", hide_env_values = true)]
    pub bitbucket_token: String,

    /// Bitbucket Server only.
    #[arg(
        long,
        env = "ATLANTIS_BITBUCKET_WEBHOOK_SECRET",
        default_value = "",
        hide_env_values = true,
    )]
    pub bitbucket_webhook_secret: String,

    /// Bitbucket Server's base URL; the default means Bitbucket Cloud.
    #[arg(long, env = "ATLANTIS_BITBUCKET_BASE_URL", default_value = DEFAULT_BITBUCKET_BASE_URL)]
    pub bitbucket_base_url: String,

    // ─── Azure DevOps ───
    #[arg(long, env = "ATLANTIS_AZUREDEVOPS_USER", default_value = "")]
    pub azuredevops_user: String,

    #[arg(long, env = "ATLANTIS_AZUREDEVOPS_TOKEN", default_value = "", hide_env_values = true)]
    pub azuredevops_token: String,

    #[arg(long, env = "ATLANTIS_AZUREDEVOPS_WEBHOOK_USER", default_value = "")]
    pub azuredevops_webhook_user: String,

    #[arg(
        long,
        env = "ATLANTIS_AZUREDEVOPS_WEBHOOK_PASSWORD",
        default_value = "",
        hide_env_values = true,
    )]
    pub azuredevops_webhook_password: String,

    // ─── Behaviour ───
    #[arg(long, env = "ATLANTIS_DISABLE_APPLY")]
    pub disable_apply: bool,

    /// Require `-d`, `-w` or `-p` on apply.
    #[arg(long, env = "ATLANTIS_DISABLE_APPLY_ALL")]
    pub disable_apply_all: bool,

    #[arg(long, env = "ATLANTIS_DISABLE_AUTOPLAN")]
    pub disable_autoplan: bool,

    #[arg(long, env = "ATLANTIS_ALLOW_DRAFT_PRS")]
    pub allow_draft_prs: bool,

    #[arg(long, env = "ATLANTIS_ALLOW_FORK_PRS")]
    pub allow_fork_prs: bool,

    #[arg(long, env = "ATLANTIS_SILENCE_ALLOWLIST_ERRORS")]
    pub silence_allowlist_errors: bool,

    #[arg(long, env = "ATLANTIS_SILENCE_FORK_PR_ERRORS")]
    pub silence_fork_pr_errors: bool,

    /// Merge pull requests once all their plans are applied.
    #[arg(long, env = "ATLANTIS_AUTOMERGE")]
    pub automerge: bool,

    #[arg(long, env = "ATLANTIS_REQUIRE_APPROVAL")]
    pub require_approval: bool,

    #[arg(long, env = "ATLANTIS_REQUIRE_MERGEABLE")]
    pub require_mergeable: bool,

    #[arg(long, env = "ATLANTIS_ENABLE_POLICY_CHECKS")]
    pub enable_policy_checks: bool,

    /// Users allowed to run `approve_policies`.
    #[arg(long, env = "ATLANTIS_POLICY_OWNERS", value_delimiter = ',')]
    pub policy_owners: Vec<String>,

    #[arg(long, env = "ATLANTIS_PARALLEL_POOL_SIZE", default_value_t = 15)]
    pub parallel_pool_size: usize,

    /// Commands run in the background at once; further webhooks queue.
    #[arg(long, env = "ATLANTIS_MAX_CONCURRENT_COMMANDS", default_value_t = 100)]
    pub max_concurrent_commands: usize,

    #[arg(long, value_enum, env = "ATLANTIS_CHECKOUT_STRATEGY", default_value = "branch")]
    pub checkout_strategy: CheckoutStrategy,

    // ─── Executables ───
    #[arg(long, env = "ATLANTIS_TF_BINARY", default_value = "terraform")]
    pub tf_binary: String,

    #[arg(long, env = "ATLANTIS_CONFTEST_BINARY", default_value = "conftest")]
    pub conftest_binary: String,

    /// Directory of policies passed to conftest.
    #[arg(long, env = "ATLANTIS_POLICY_DIR")]
    pub policy_dir: Option<PathBuf>,

    /// Shell command run in the pull's clone before every command.
    #[arg(long = "pre-workflow-hook", env = "ATLANTIS_PRE_WORKFLOW_HOOKS", value_delimiter = ';')]
    pub pre_workflow_hooks: Vec<String>,

    /// Shell command run in the pull's clone after every command.
    #[arg(long = "post-workflow-hook", env = "ATLANTIS_POST_WORKFLOW_HOOKS", value_delimiter = ';')]
    pub post_workflow_hooks: Vec<String>,
}

impl Config {
    /// Trims the `@` users sometimes prefix their usernames with.
    pub fn normalize(mut self) -> Self {
        for user in [
            &mut self.gh_user,
            &mut self.gitlab_user,
            &mut self.bitbucket_user,
            &mut self.azuredevops_user,
        ] {
            if let Some(trimmed) = user.strip_prefix('@') {
                *user = trimmed.to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel);
        }

        let pairs = [
            (&self.gh_user, &self.gh_token),
            (&self.gitlab_user, &self.gitlab_token),
            (&self.bitbucket_user, &self.bitbucket_token),
            (&self.azuredevops_user, &self.azuredevops_token),
        ];
        if pairs.iter().any(|(u, t)| u.is_empty() != t.is_empty())
            || pairs.iter().all(|(u, _)| u.is_empty())
        {
            return Err(ConfigError::NoVcsConfigured);
        }

        match self.repo_allowlist.as_deref() {
            None | Some("") => return Err(ConfigError::MissingAllowlist),
            Some(list) if list.contains("://") => return Err(ConfigError::AllowlistScheme),
            Some(_) => {}
        }

        if self.bitbucket_is_cloud() && !self.bitbucket_webhook_secret.is_empty() {
            return Err(ConfigError::BitbucketCloudSecret);
        }
        let parsed = url::Url::parse(&self.bitbucket_base_url).map_err(|e| {
            ConfigError::InvalidBitbucketUrl {
                url: self.bitbucket_base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::BitbucketUrlScheme(self.bitbucket_base_url.clone()));
        }
        Ok(())
    }

    pub fn bitbucket_is_cloud(&self) -> bool {
        self.bitbucket_base_url.trim_end_matches('/') == DEFAULT_BITBUCKET_BASE_URL
    }

    /// The hosts whose webhooks are accepted, one per configured user.
    pub fn supported_hosts(&self) -> Vec<VcsHostType> {
        let mut hosts = Vec::new();
        if !self.gh_user.is_empty() {
            hosts.push(VcsHostType::Github);
        }
        if !self.gitlab_user.is_empty() {
            hosts.push(VcsHostType::Gitlab);
        }
        if !self.bitbucket_user.is_empty() {
            hosts.push(if self.bitbucket_is_cloud() {
                VcsHostType::BitbucketCloud
            } else {
                VcsHostType::BitbucketServer
            });
        }
        if !self.azuredevops_user.is_empty() {
            hosts.push(VcsHostType::AzureDevops);
        }
        hosts
    }

    /// The data dir with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(rest),
                None => PathBuf::from(&self.data_dir),
            },
            None => PathBuf::from(&self.data_dir),
        }
    }

    pub fn atlantis_url(&self) -> String {
        match &self.atlantis_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("http://localhost:{}", self.port),
        }
    }

    /// Filter directives used when `RUST_LOG` isn't set.
    pub fn log_filter(&self) -> String {
        format!("atlantis={0},tower_http={0}", self.log_level)
    }

    /// Apply requirements enforced for every project.
    pub fn global_requirements(&self) -> Vec<ApplyRequirement> {
        let mut requirements = Vec::new();
        if self.require_approval {
            requirements.push(ApplyRequirement::Approved);
        }
        if self.require_mergeable {
            requirements.push(ApplyRequirement::Mergeable);
        }
        requirements
    }

    /// Warns about configured hosts whose webhooks can't be authenticated.
    pub fn warn_insecure_webhooks(&self) {
        if !self.gh_user.is_empty() && self.gh_webhook_secret.is_empty() {
            warn!("No GitHub webhook secret set. This could allow attackers to spoof requests from GitHub");
        }
        if !self.gitlab_user.is_empty() && self.gitlab_webhook_secret.is_empty() {
            warn!("No GitLab webhook secret set. This could allow attackers to spoof requests from GitLab");
        }
        if !self.bitbucket_user.is_empty() {
            if self.bitbucket_is_cloud() {
                warn!("Bitbucket Cloud does not support webhook secrets. This could allow attackers to spoof requests from Bitbucket. Ensure you are allowing only Bitbucket IPs");
            } else if self.bitbucket_webhook_secret.is_empty() {
                warn!("No Bitbucket webhook secret set. This could allow attackers to spoof requests from Bitbucket");
            }
        }
        if !self.azuredevops_user.is_empty()
            && (self.azuredevops_webhook_user.is_empty()
                || self.azuredevops_webhook_password.is_empty())
        {
            warn!("No Azure DevOps webhook user and password set. This could allow attackers to spoof requests from Azure DevOps");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["atlantis"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap().normalize()
    }

    fn github(extra: &[&str]) -> Config {
        let mut args = vec!["--gh-user", "bot", "--gh-token", "t", "--repo-allowlist", "*"];
        args.extend_from_slice(extra);
        parse(&args)
    }

    #[test]
    fn defaults() {
        let config = github(&[]);
        assert_eq!(config.port, 4141);
        assert_eq!(config.parallel_pool_size, 15);
        assert_eq!(config.max_concurrent_commands, 100);
        assert_eq!(config.checkout_strategy, CheckoutStrategy::Branch);
        assert_eq!(config.atlantis_url(), "http://localhost:4141");
        assert_eq!(config.supported_hosts(), vec![VcsHostType::Github]);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn leading_at_is_trimmed() {
        let config = parse(&["--gh-user", "@bot", "--gh-token", "t"]);
        assert_eq!(config.gh_user, "bot");
    }

    #[test]
    fn user_without_token_is_rejected() {
        let config = parse(&["--gh-user", "bot", "--repo-allowlist", "*"]);
        assert_eq!(config.validate(), Err(ConfigError::NoVcsConfigured));
    }

    #[test]
    fn some_vcs_is_required() {
        let config = parse(&["--repo-allowlist", "*"]);
        assert_eq!(config.validate(), Err(ConfigError::NoVcsConfigured));
    }

    #[test]
    fn allowlist_rules() {
        let config = parse(&["--gh-user", "bot", "--gh-token", "t"]);
        assert_eq!(config.validate(), Err(ConfigError::MissingAllowlist));

        let config = parse(&[
            "--gh-user",
            "bot",
            "--gh-token",
            "t",
            "--repo-allowlist",
            "https://github.com/owner/*",
        ]);
        assert_eq!(config.validate(), Err(ConfigError::AllowlistScheme));
    }

    #[test]
    fn invalid_log_level() {
        let config = github(&["--log-level", "verbose"]);
        assert_eq!(config.validate(), Err(ConfigError::InvalidLogLevel));
    }

    #[test]
    fn bitbucket_cloud_rejects_webhook_secret() {
        let config = github(&[
            "--bitbucket-user",
            "bb",
            "--bitbucket-token",
            "t",
            "--bitbucket-webhook-secret",
            "s",
        ]);
        assert_eq!(config.validate(), Err(ConfigError::BitbucketCloudSecret));
    }

    #[test]
    fn bitbucket_server_url_needs_http() {
        let config = github(&["--bitbucket-base-url", "ftp://bitbucket.example.com"]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::BitbucketUrlScheme(
                "ftp://bitbucket.example.com".into()
            ))
        );
    }

    #[test]
    fn bitbucket_host_depends_on_base_url() {
        let cloud = parse(&["--bitbucket-user", "bb", "--bitbucket-token", "t"]);
        assert_eq!(cloud.supported_hosts(), vec![VcsHostType::BitbucketCloud]);

        let server = parse(&[
            "--bitbucket-user",
            "bb",
            "--bitbucket-token",
            "t",
            "--bitbucket-base-url",
            "https://bitbucket.example.com",
        ]);
        assert_eq!(server.supported_hosts(), vec![VcsHostType::BitbucketServer]);
    }

    #[test]
    fn requirements_and_lists() {
        let config = github(&[
            "--require-approval",
            "--policy-owners",
            "alice,bob",
            "--pre-workflow-hook",
            "echo pre",
        ]);
        assert_eq!(config.global_requirements(), vec![ApplyRequirement::Approved]);
        assert_eq!(config.policy_owners, vec!["alice", "bob"]);
        assert_eq!(config.pre_workflow_hooks, vec!["echo pre"]);
    }

    #[test]
    fn absolute_data_dir_is_kept() {
        let config = github(&["--data-dir", "/var/lib/atlantis"]);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/atlantis"));
    }
}
