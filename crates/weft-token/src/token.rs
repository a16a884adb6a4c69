//! Bearer token format: parse, sign, verify
//!
//! A token is three dot-joined base64url segments: a header naming the
//! signature algorithm, the JSON claims, and the ECDSA `(r, s)` pair over
//! the canonical claims encoding, each component base64-encoded and
//! colon-joined.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

/// Sentinel for an unset time bound
pub const UNSET: i64 = -1;

/// The only signature algorithm the mesh issues
pub const ALGORITHM_ECDSA: &str = "ecdsa";

/// Token header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signature algorithm tag
    pub alg: String,
}

/// Token claims
///
/// `nbf` and `exp` are unix seconds with `-1` meaning unset; `store` names
/// the revocation store responsible for the token, empty when the token is
/// not store-backed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer fully qualified name
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Token id
    pub jti: String,
    /// Not-before bound, unix seconds or -1
    pub nbf: i64,
    /// Expiry bound, unix seconds or -1
    pub exp: i64,
    /// Fully qualified name of the responsible revocation store, or empty
    pub store: String,
}

impl Claims {
    /// Fresh claims with a random id and no bounds
    pub fn new(issuer: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            jti: Uuid::new_v4().to_string(),
            nbf: UNSET,
            exp: UNSET,
            store: String::new(),
        }
    }

    /// Canonical JSON encoding; the signature covers exactly these bytes
    pub fn canonical_json(&self) -> Result<Vec<u8>, TokenError> {
        serde_json::to_vec(self).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

/// Result of a signature-and-window check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    NotSigned,
    Expired,
    NotEffective,
}

/// Final status of a presented token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Valid,
    NotEffective,
    Expired,
    NotSigned,
    NotValid,
    Revoked,
    UnknownIssuer,
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenStatus::Valid => "valid",
            TokenStatus::NotEffective => "not-effective",
            TokenStatus::Expired => "expired",
            TokenStatus::NotSigned => "not-signed",
            TokenStatus::NotValid => "not-valid",
            TokenStatus::Revoked => "revoked",
            TokenStatus::UnknownIssuer => "unknown-issuer",
        };
        f.write_str(s)
    }
}

impl From<VerifyOutcome> for TokenStatus {
    fn from(outcome: VerifyOutcome) -> Self {
        match outcome {
            VerifyOutcome::Valid => TokenStatus::Valid,
            VerifyOutcome::NotSigned => TokenStatus::NotSigned,
            VerifyOutcome::Expired => TokenStatus::Expired,
            VerifyOutcome::NotEffective => TokenStatus::NotEffective,
        }
    }
}

/// A structurally parsed bearer token
#[derive(Debug, Clone, PartialEq)]
pub struct BearerToken {
    /// Parsed header
    pub header: TokenHeader,
    /// Parsed claims
    pub claims: Claims,
    signature_r: Vec<u8>,
    signature_s: Vec<u8>,
}

impl BearerToken {
    /// Structural parse of the three-segment wire form
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::Malformed(format!(
                "expected 3 segments, got {}",
                segments.len()
            )));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(segments[0])
            .map_err(|e| TokenError::Malformed(format!("header segment: {}", e)))?;
        let header: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| TokenError::Malformed(format!("header json: {}", e)))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|e| TokenError::Malformed(format!("claims segment: {}", e)))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| TokenError::Malformed(format!("claims json: {}", e)))?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(segments[2])
            .map_err(|e| TokenError::Malformed(format!("signature segment: {}", e)))?;
        let signature_text = String::from_utf8(signature_bytes)
            .map_err(|e| TokenError::Malformed(format!("signature segment: {}", e)))?;
        let (r_text, s_text) = signature_text
            .split_once(':')
            .ok_or_else(|| TokenError::Malformed("signature is not an r:s pair".to_string()))?;

        let signature_r = STANDARD
            .decode(r_text)
            .map_err(|e| TokenError::Malformed(format!("signature r: {}", e)))?;
        let signature_s = STANDARD
            .decode(s_text)
            .map_err(|e| TokenError::Malformed(format!("signature s: {}", e)))?;

        Ok(Self {
            header,
            claims,
            signature_r,
            signature_s,
        })
    }

    /// Verify the signature against the issuer's public key and evaluate
    /// the time window at `now` (unix seconds)
    pub fn verify_at(
        &self,
        issuer_key: &VerifyingKey,
        now: i64,
    ) -> Result<VerifyOutcome, TokenError> {
        if self.header.alg != ALGORITHM_ECDSA {
            return Err(TokenError::UnsupportedAlgorithm(self.header.alg.clone()));
        }

        let Some(signature) = self.decoded_signature() else {
            return Ok(VerifyOutcome::NotSigned);
        };
        let canonical = self.claims.canonical_json()?;
        if issuer_key.verify(&canonical, &signature).is_err() {
            return Ok(VerifyOutcome::NotSigned);
        }

        if self.claims.exp != UNSET && self.claims.exp <= now {
            return Ok(VerifyOutcome::Expired);
        }
        if self.claims.nbf != UNSET && self.claims.nbf > now {
            return Ok(VerifyOutcome::NotEffective);
        }
        Ok(VerifyOutcome::Valid)
    }

    /// Like [`verify_at`](Self::verify_at) against the current wall clock
    pub fn verify(&self, issuer_key: &VerifyingKey) -> Result<VerifyOutcome, TokenError> {
        self.verify_at(issuer_key, chrono::Utc::now().timestamp())
    }

    fn decoded_signature(&self) -> Option<Signature> {
        let r: [u8; 32] = self.signature_r.as_slice().try_into().ok()?;
        let s: [u8; 32] = self.signature_s.as_slice().try_into().ok()?;
        Signature::from_scalars(r, s).ok()
    }
}

/// Sign claims into the wire form
pub fn sign(claims: &Claims, key: &SigningKey) -> Result<String, TokenError> {
    let header = TokenHeader {
        alg: ALGORITHM_ECDSA.to_string(),
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| TokenError::Malformed(e.to_string()))?;
    let claims_json = claims.canonical_json()?;

    let signature: Signature = key.sign(&claims_json);
    let (r, s) = signature.split_bytes();
    let signature_text = format!("{}:{}", STANDARD.encode(r), STANDARD.encode(s));

    Ok(format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(&header_json),
        URL_SAFE_NO_PAD.encode(&claims_json),
        URL_SAFE_NO_PAD.encode(signature_text.as_bytes())
    ))
}
