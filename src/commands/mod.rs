//! Command parsing for pull request comments.
//!
//! This module provides types and parsing for commands that users issue via
//! pull request comments.
//!
//! # Supported Commands
//!
//! - `atlantis plan [-d dir] [-w workspace] [-p project] [--verbose] [-- args]`
//! - `atlantis apply [-d dir] [-w workspace] [-p project] [--auto-merge-disabled] [--verbose]`
//! - `atlantis approve_policies [--verbose]`
//! - `atlantis unlock`
//! - `atlantis version [-d dir] [-w workspace] [-p project]`
//! - `atlantis help`
//!
//! `run` and `@{vcs user}` work in place of `atlantis`.
//!
//! # Example
//!
//! ```
//! use atlantis::commands::{CommandName, CommentParseResult, CommentParser};
//! use atlantis::types::VcsHostType;
//!
//! let parser = CommentParser::default();
//! let CommentParseResult::Command(cmd) = parser.parse("run apply -d infra", VcsHostType::Gitlab)
//! else {
//!     panic!("expected a command");
//! };
//! assert_eq!(cmd.name, CommandName::Apply);
//! assert_eq!(cmd.repo_rel_dir, "infra");
//! ```

mod flags;
mod parser;
mod types;

pub use parser::{
    CommentParser, DID_YOU_MEAN_ATLANTIS, EXECUTABLE, UNLOCK_USAGE, build_apply_comment,
    build_plan_comment, build_version_comment, help_comment,
};
pub use types::{CommandName, CommentCommand, CommentParseResult};
