//! Per-provider webhook request validation.
//!
//! Each VCS authenticates its webhooks differently:
//!
//! - GitHub signs the body with HMAC-SHA256 (`X-Hub-Signature-256`) or, for
//!   older hooks, HMAC-SHA1 (`X-Hub-Signature`).
//! - GitLab sends the shared secret verbatim in `X-Gitlab-Token`.
//! - Bitbucket Server signs with HMAC and an algorithm named in the header.
//! - Azure DevOps uses HTTP basic auth.
//! - Bitbucket Cloud does not authenticate webhooks at all.
//!
//! When no secret is configured the check is skipped entirely. That is an
//! explicit operator opt-out; startup logs a warning for it.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::signature::{HashAlgorithm, SignatureError, verify_signature, verify_signature_with};

pub const GITHUB_SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
pub const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature";
pub const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";
pub const BITBUCKET_SERVER_SIGNATURE_HEADER: &str = "x-hub-signature";

/// Errors that reject a webhook request before it is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("webhook request has unsupported Content-Type {0:?}")]
    UnsupportedContentType(String),

    #[error("webhook request did not contain expected 'payload' form value")]
    MissingFormPayload,

    #[error("missing signature")]
    MissingSignature,

    #[error("payload signature check failed")]
    SignatureMismatch,

    #[error("{0}")]
    Signature(#[from] SignatureError),

    #[error("header X-Gitlab-Token was missing")]
    MissingGitlabToken,

    #[error("header X-Gitlab-Token did not match expected secret")]
    GitlabTokenMismatch,

    #[error("request is missing basic auth credentials")]
    MissingBasicAuth,

    #[error("basic auth credentials did not match")]
    BasicAuthMismatch,
}

/// Result type for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Verifies a webhook request's authenticity and extracts its JSON payload.
pub trait RequestValidator: Send + Sync {
    /// Returns the JSON payload bytes of an authentic request.
    fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>>;
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn content_type(headers: &HeaderMap) -> &str {
    header(headers, CONTENT_TYPE.as_str()).unwrap_or_default()
}

/// Extracts the JSON payload from a GitHub delivery, which is either the raw
/// body or the `payload` field of a form-encoded body.
fn github_payload(headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
    match content_type(headers) {
        "application/json" => Ok(body.to_vec()),
        "application/x-www-form-urlencoded" => url::form_urlencoded::parse(body)
            .find(|(k, _)| k == "payload")
            .map(|(_, v)| v.into_owned().into_bytes())
            .filter(|v| !v.is_empty())
            .ok_or(ValidationError::MissingFormPayload),
        other => Err(ValidationError::UnsupportedContentType(other.to_string())),
    }
}

/// GitHub webhook validation.
#[derive(Debug, Clone, Default)]
pub struct GithubValidator {
    secret: Vec<u8>,
}

impl GithubValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        GithubValidator {
            secret: secret.into(),
        }
    }
}

impl RequestValidator for GithubValidator {
    fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
        if !self.secret.is_empty() {
            let verified = if let Some(sig) = header(headers, GITHUB_SIGNATURE_256_HEADER) {
                verify_signature_with(HashAlgorithm::Sha256, body, sig, &self.secret)
            } else if let Some(sig) = header(headers, GITHUB_SIGNATURE_HEADER) {
                verify_signature_with(HashAlgorithm::Sha1, body, sig, &self.secret)
            } else {
                return Err(ValidationError::MissingSignature);
            };
            if !verified {
                return Err(ValidationError::SignatureMismatch);
            }
        }
        github_payload(headers, body)
    }
}

/// GitLab webhook validation.
#[derive(Debug, Clone, Default)]
pub struct GitlabValidator {
    secret: Vec<u8>,
}

impl GitlabValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        GitlabValidator {
            secret: secret.into(),
        }
    }
}

impl RequestValidator for GitlabValidator {
    fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
        if !self.secret.is_empty() {
            let token = header(headers, GITLAB_TOKEN_HEADER)
                .ok_or(ValidationError::MissingGitlabToken)?;
            if !bool::from(token.as_bytes().ct_eq(&self.secret)) {
                return Err(ValidationError::GitlabTokenMismatch);
            }
        }
        Ok(body.to_vec())
    }
}

/// Bitbucket Server webhook validation.
#[derive(Debug, Clone, Default)]
pub struct BitbucketServerValidator {
    secret: Vec<u8>,
}

impl BitbucketServerValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        BitbucketServerValidator {
            secret: secret.into(),
        }
    }
}

impl RequestValidator for BitbucketServerValidator {
    fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
        if !self.secret.is_empty() {
            let sig = header(headers, BITBUCKET_SERVER_SIGNATURE_HEADER).unwrap_or_default();
            if !verify_signature(body, sig, &self.secret)? {
                return Err(ValidationError::SignatureMismatch);
            }
        }
        Ok(body.to_vec())
    }
}

/// Bitbucket Cloud has no webhook authentication; the body is the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitbucketCloudValidator;

impl RequestValidator for BitbucketCloudValidator {
    fn validate(&self, _headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
        Ok(body.to_vec())
    }
}

/// Azure DevOps webhook validation via basic auth.
#[derive(Debug, Clone, Default)]
pub struct AzureDevopsValidator {
    user: Vec<u8>,
    password: Vec<u8>,
}

impl AzureDevopsValidator {
    pub fn new(user: impl Into<Vec<u8>>, password: impl Into<Vec<u8>>) -> Self {
        AzureDevopsValidator {
            user: user.into(),
            password: password.into(),
        }
    }

    fn check_basic_auth(&self, headers: &HeaderMap) -> Result<()> {
        let encoded = header(headers, AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Basic "))
            .ok_or(ValidationError::MissingBasicAuth)?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| ValidationError::MissingBasicAuth)?;
        let sep = decoded
            .iter()
            .position(|b| *b == b':')
            .ok_or(ValidationError::MissingBasicAuth)?;
        let (user, password) = (&decoded[..sep], &decoded[sep + 1..]);

        let user_ok = user.ct_eq(&self.user);
        let password_ok = password.ct_eq(&self.password);
        if !bool::from(user_ok & password_ok) {
            return Err(ValidationError::BasicAuthMismatch);
        }
        Ok(())
    }
}

impl RequestValidator for AzureDevopsValidator {
    fn validate(&self, headers: &HeaderMap, body: &[u8]) -> Result<Vec<u8>> {
        if !self.user.is_empty() && !self.password.is_empty() {
            self.check_basic_auth(headers)?;
        }
        match content_type(headers) {
            "application/json" | "application/json; charset=utf-8" => Ok(body.to_vec()),
            other => Err(ValidationError::UnsupportedContentType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::signature::{compute_signature, format_signature_header};
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn github_without_secret_reads_json() {
        let v = GithubValidator::default();
        let h = headers(&[("content-type", "application/json")]);
        assert_eq!(v.validate(&h, b"{}").unwrap(), b"{}");
    }

    #[test]
    fn github_form_payload_is_extracted() {
        let v = GithubValidator::default();
        let h = headers(&[("content-type", "application/x-www-form-urlencoded")]);
        let body = b"payload=%7B%22a%22%3A1%7D";
        assert_eq!(v.validate(&h, body).unwrap(), br#"{"a":1}"#);

        assert_eq!(
            v.validate(&h, b"other=1").unwrap_err(),
            ValidationError::MissingFormPayload
        );
    }

    #[test]
    fn github_rejects_unknown_content_type() {
        let v = GithubValidator::default();
        let h = headers(&[("content-type", "text/plain")]);
        assert_eq!(
            v.validate(&h, b"{}").unwrap_err().to_string(),
            "webhook request has unsupported Content-Type \"text/plain\""
        );
    }

    #[test]
    fn github_prefers_sha256_and_falls_back_to_sha1() {
        let v = GithubValidator::new("secret");
        let body = br#"{"x":1}"#;

        let sig256 = format_signature_header(
            HashAlgorithm::Sha256,
            &compute_signature(HashAlgorithm::Sha256, body, b"secret"),
        );
        let h = headers(&[
            ("content-type", "application/json"),
            (GITHUB_SIGNATURE_256_HEADER, &sig256),
            (GITHUB_SIGNATURE_HEADER, "sha1=00"),
        ]);
        assert!(v.validate(&h, body).is_ok());

        let sig1 = format_signature_header(
            HashAlgorithm::Sha1,
            &compute_signature(HashAlgorithm::Sha1, body, b"secret"),
        );
        let h = headers(&[
            ("content-type", "application/json"),
            (GITHUB_SIGNATURE_HEADER, &sig1),
        ]);
        assert!(v.validate(&h, body).is_ok());
    }

    #[test]
    fn github_with_secret_requires_signature() {
        let v = GithubValidator::new("secret");
        let h = headers(&[("content-type", "application/json")]);
        assert_eq!(
            v.validate(&h, b"{}").unwrap_err(),
            ValidationError::MissingSignature
        );

        let h = headers(&[
            ("content-type", "application/json"),
            (GITHUB_SIGNATURE_256_HEADER, "sha256=00"),
        ]);
        assert_eq!(
            v.validate(&h, b"{}").unwrap_err(),
            ValidationError::SignatureMismatch
        );
    }

    #[test]
    fn gitlab_token_is_compared() {
        let v = GitlabValidator::new("tok");
        assert_eq!(
            v.validate(&HeaderMap::new(), b"{}").unwrap_err(),
            ValidationError::MissingGitlabToken
        );
        let bad = headers(&[(GITLAB_TOKEN_HEADER, "nope")]);
        assert_eq!(
            v.validate(&bad, b"{}").unwrap_err(),
            ValidationError::GitlabTokenMismatch
        );
        let good = headers(&[(GITLAB_TOKEN_HEADER, "tok")]);
        assert!(v.validate(&good, b"{}").is_ok());

        assert!(GitlabValidator::default().validate(&bad, b"{}").is_ok());
    }

    #[test]
    fn bitbucket_server_selects_algorithm_from_prefix() {
        let v = BitbucketServerValidator::new("s");
        let body = b"{}";
        for algo in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let sig = format_signature_header(algo, &compute_signature(algo, body, b"s"));
            let h = headers(&[(BITBUCKET_SERVER_SIGNATURE_HEADER, &sig)]);
            assert!(v.validate(&h, body).is_ok(), "{:?}", algo);
        }

        let h = headers(&[(BITBUCKET_SERVER_SIGNATURE_HEADER, "md5=abcd")]);
        assert_eq!(
            v.validate(&h, body).unwrap_err(),
            ValidationError::Signature(SignatureError::UnsupportedAlgorithm("md5".to_string()))
        );
        assert_eq!(
            v.validate(&HeaderMap::new(), body).unwrap_err(),
            ValidationError::Signature(SignatureError::InvalidFormat)
        );
    }

    #[test]
    fn azure_basic_auth() {
        let v = AzureDevopsValidator::new("user", "pass");
        let good = format!("Basic {}", STANDARD.encode("user:pass"));
        let bad = format!("Basic {}", STANDARD.encode("user:nope"));

        let h = headers(&[("content-type", "application/json"), ("authorization", &good)]);
        assert!(v.validate(&h, b"{}").is_ok());

        let h = headers(&[("content-type", "application/json"), ("authorization", &bad)]);
        assert_eq!(
            v.validate(&h, b"{}").unwrap_err(),
            ValidationError::BasicAuthMismatch
        );

        let h = headers(&[("content-type", "application/json")]);
        assert_eq!(
            v.validate(&h, b"{}").unwrap_err(),
            ValidationError::MissingBasicAuth
        );
    }

    #[test]
    fn azure_without_credentials_checks_content_type() {
        let v = AzureDevopsValidator::default();
        let h = headers(&[("content-type", "application/json; charset=utf-8")]);
        assert!(v.validate(&h, b"{}").is_ok());
        let h = headers(&[("content-type", "text/xml")]);
        assert!(matches!(
            v.validate(&h, b"{}"),
            Err(ValidationError::UnsupportedContentType(_))
        ));
    }
}
