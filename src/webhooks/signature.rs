//! Webhook signature verification using HMAC.
//!
//! GitHub and Bitbucket Server sign webhook payloads with an HMAC over the raw
//! body using a shared secret. The signature header has the form
//! `<algorithm>=<hex>`, where the algorithm is one of `sha1`, `sha256` or
//! `sha512`. GitHub sends `sha256` in `X-Hub-Signature-256` and `sha1` in the
//! legacy `X-Hub-Signature`; Bitbucket Server picks the algorithm per hook.
//!
//! Signature verification is the first step in webhook processing; invalid
//! signatures are rejected before parsing.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use thiserror::Error;

/// HMAC hash functions accepted in signature headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Parses the algorithm prefix of a signature header.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sha1" => Some(HashAlgorithm::Sha1),
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

/// Errors from parsing a signature header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The header is not of the form `<algorithm>=<hex>`.
    #[error("signature format is invalid, expected <algorithm>=<hex>")]
    InvalidFormat,

    /// The algorithm prefix is not one we can compute.
    #[error("signature hash algorithm {0:?} is not supported")]
    UnsupportedAlgorithm(String),

    /// The digest part is not valid hex.
    #[error("signature is not valid hex")]
    InvalidHex,
}

/// Parses a signature header (e.g., "sha256=abc123...") into its algorithm and
/// raw digest bytes.
///
/// Never panics.
///
/// # Examples
///
/// ```
/// use atlantis::webhooks::{HashAlgorithm, parse_signature_header};
///
/// let (algo, digest) = parse_signature_header("sha256=abcd1234").unwrap();
/// assert_eq!(algo, HashAlgorithm::Sha256);
/// assert_eq!(digest, vec![0xab, 0xcd, 0x12, 0x34]);
///
/// // Invalid: missing prefix
/// assert!(parse_signature_header("abcd1234").is_err());
///
/// // Invalid: unknown algorithm
/// assert!(parse_signature_header("md5=abcd1234").is_err());
/// ```
pub fn parse_signature_header(header: &str) -> Result<(HashAlgorithm, Vec<u8>), SignatureError> {
    let (prefix, hex_sig) = header
        .split_once('=')
        .ok_or(SignatureError::InvalidFormat)?;
    let algo = HashAlgorithm::from_prefix(prefix)
        .ok_or_else(|| SignatureError::UnsupportedAlgorithm(prefix.to_string()))?;
    let digest = hex::decode(hex_sig).map_err(|_| SignatureError::InvalidHex)?;
    Ok((algo, digest))
}

fn mac_bytes<M: Mac + KeyInit>(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this branch is unreachable in practice.
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn mac_verify<M: Mac + KeyInit>(payload: &[u8], secret: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    // Constant-time comparison via the HMAC library
    mac.verify_slice(expected).is_ok()
}

/// Computes the HMAC signature of a payload using the given secret.
pub fn compute_signature(algo: HashAlgorithm, payload: &[u8], secret: &[u8]) -> Vec<u8> {
    match algo {
        HashAlgorithm::Sha1 => mac_bytes::<Hmac<Sha1>>(payload, secret),
        HashAlgorithm::Sha256 => mac_bytes::<Hmac<Sha256>>(payload, secret),
        HashAlgorithm::Sha512 => mac_bytes::<Hmac<Sha512>>(payload, secret),
    }
}

/// Formats a signature as a header value, `<algorithm>=<hex>`.
pub fn format_signature_header(algo: HashAlgorithm, signature: &[u8]) -> String {
    format!("{}={}", algo.prefix(), hex::encode(signature))
}

/// Verifies a signature header against the payload and secret, using
/// whichever algorithm the header names.
///
/// Returns `Err` only when the header itself is malformed; a well-formed
/// header with the wrong digest yields `Ok(false)`.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
) -> Result<bool, SignatureError> {
    let (algo, expected) = parse_signature_header(signature_header)?;
    Ok(verify_digest(algo, payload, &expected, secret))
}

/// Verifies a signature header that must use a specific algorithm.
///
/// Returns `false` for malformed headers or a different algorithm.
pub fn verify_signature_with(
    algo: HashAlgorithm,
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
) -> bool {
    match parse_signature_header(signature_header) {
        Ok((parsed, expected)) if parsed == algo => {
            verify_digest(algo, payload, &expected, secret)
        }
        _ => false,
    }
}

fn verify_digest(algo: HashAlgorithm, payload: &[u8], expected: &[u8], secret: &[u8]) -> bool {
    match algo {
        HashAlgorithm::Sha1 => mac_verify::<Hmac<Sha1>>(payload, secret, expected),
        HashAlgorithm::Sha256 => mac_verify::<Hmac<Sha256>>(payload, secret, expected),
        HashAlgorithm::Sha512 => mac_verify::<Hmac<Sha512>>(payload, secret, expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ========================================================================
    // Unit tests
    // ========================================================================

    #[test]
    fn parse_header_for_each_algorithm() {
        for algo in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let header = format!("{}=1234abcd", algo.prefix());
            let (parsed, digest) = parse_signature_header(&header).unwrap();
            assert_eq!(parsed, algo);
            assert_eq!(digest, vec![0x12, 0x34, 0xab, 0xcd]);
        }
    }

    #[test]
    fn parse_header_errors_are_distinct() {
        assert_eq!(
            parse_signature_header("1234abcd"),
            Err(SignatureError::InvalidFormat)
        );
        assert_eq!(
            parse_signature_header("md5=1234abcd"),
            Err(SignatureError::UnsupportedAlgorithm("md5".to_string()))
        );
        assert_eq!(
            parse_signature_header("sha256=xyz"),
            Err(SignatureError::InvalidHex)
        );
    }

    #[test]
    fn digest_lengths_match_algorithm() {
        assert_eq!(compute_signature(HashAlgorithm::Sha1, b"p", b"s").len(), 20);
        assert_eq!(compute_signature(HashAlgorithm::Sha256, b"p", b"s").len(), 32);
        assert_eq!(compute_signature(HashAlgorithm::Sha512, b"p", b"s").len(), 64);
    }

    /// Known vector from GitHub's webhook documentation.
    #[test]
    fn github_documentation_example() {
        let payload = b"Hello, World!";
        let secret = b"It's a Secret to Everybody";
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert_eq!(verify_signature(payload, header, secret), Ok(true));
        assert!(verify_signature_with(
            HashAlgorithm::Sha256,
            payload,
            header,
            secret
        ));
    }

    #[test]
    fn verify_with_rejects_other_algorithm() {
        let sig = compute_signature(HashAlgorithm::Sha1, b"payload", b"secret");
        let header = format_signature_header(HashAlgorithm::Sha1, &sig);
        assert!(verify_signature_with(HashAlgorithm::Sha1, b"payload", &header, b"secret"));
        assert!(!verify_signature_with(HashAlgorithm::Sha256, b"payload", &header, b"secret"));
    }

    #[test]
    fn wrong_secret_is_not_an_error() {
        let sig = compute_signature(HashAlgorithm::Sha512, b"payload", b"right");
        let header = format_signature_header(HashAlgorithm::Sha512, &sig);
        assert_eq!(verify_signature(b"payload", &header, b"wrong"), Ok(false));
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    fn arb_algo() -> impl Strategy<Value = HashAlgorithm> {
        prop_oneof![
            Just(HashAlgorithm::Sha1),
            Just(HashAlgorithm::Sha256),
            Just(HashAlgorithm::Sha512),
        ]
    }

    proptest! {
        #[test]
        fn prop_sign_verify_roundtrip(algo in arb_algo(), payload: Vec<u8>, secret: Vec<u8>) {
            let sig = compute_signature(algo, &payload, &secret);
            let header = format_signature_header(algo, &sig);
            prop_assert_eq!(verify_signature(&payload, &header, &secret), Ok(true));
        }

        #[test]
        fn prop_modified_payload_fails(
            algo in arb_algo(),
            original: Vec<u8>,
            modified: Vec<u8>,
            secret: Vec<u8>
        ) {
            prop_assume!(original != modified);
            let sig = compute_signature(algo, &original, &secret);
            let header = format_signature_header(algo, &sig);
            prop_assert_eq!(verify_signature(&modified, &header, &secret), Ok(false));
        }

        /// Malformed headers never cause a panic.
        #[test]
        fn prop_malformed_header_no_panic(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = parse_signature_header(&header);
            let _ = verify_signature(&payload, &header, &secret);
            let _ = verify_signature_with(HashAlgorithm::Sha256, &payload, &header, &secret);
        }
    }
}
