//! Inbound webhook handling for every supported VCS host.
//!
//! This module provides:
//! - Signature and token verification ([`validate`], [`signature`])
//! - Payload parsing into canonical events ([`parser`], [`events`])

pub mod events;
pub mod parser;
pub mod signature;
pub mod validate;

pub use events::{CommentEvent, EventKind, ParsedWebhook, PullEvent, VcsEvent};
pub use parser::{Credentials, EventParser, ParseError};
pub use signature::{
    HashAlgorithm, compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
pub use validate::{
    AzureDevopsValidator, BitbucketCloudValidator, BitbucketServerValidator, GithubValidator,
    GitlabValidator, RequestValidator, ValidationError,
};

/// Bitbucket Server's diagnostics ping event key.
pub const BITBUCKET_SERVER_DIAGNOSTICS_PING: &str = "diagnostics:ping";
