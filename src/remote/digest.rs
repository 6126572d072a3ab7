//! Content digests of downloaded sources

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};

/// Hex-encoded digests known for one piece of content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Digests {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha512: Option<String>,
}

impl Digests {
    pub fn sha256(hex: impl Into<String>) -> Self {
        Self {
            sha256: Some(hex.into()),
            sha512: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sha256.is_none() && self.sha512.is_none()
    }

    /// True when some digest kind is known on both sides and every such kind agrees
    pub fn same_content(&self, other: &Digests) -> Option<bool> {
        let pairs = [(&self.sha256, &other.sha256), (&self.sha512, &other.sha512)];
        let mut compared = false;
        for (left, right) in pairs {
            if let (Some(left), Some(right)) = (left, right) {
                if !left.eq_ignore_ascii_case(right) {
                    return Some(false);
                }
                compared = true;
            }
        }
        compared.then_some(true)
    }

    /// Kinds that disagree between `self` (expected) and `actual`
    pub fn mismatches(&self, actual: &Digests) -> Vec<DigestMismatch> {
        let mut mismatches = Vec::new();
        for (kind, expected, got) in [
            ("sha256", &self.sha256, &actual.sha256),
            ("sha512", &self.sha512, &actual.sha512),
        ] {
            if let (Some(expected), Some(got)) = (expected, got)
                && !expected.eq_ignore_ascii_case(got)
            {
                mismatches.push(DigestMismatch {
                    kind,
                    expected: expected.clone(),
                    actual: got.clone(),
                });
            }
        }
        mismatches
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestMismatch {
    pub kind: &'static str,
    pub expected: String,
    pub actual: String,
}

/// Digests and size of a complete download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashed {
    pub digests: Digests,
    pub size: u64,
}

pub fn hash(body: &[u8]) -> Hashed {
    let mut sha256 = Sha256::new();
    sha256.update(body);
    let mut sha512 = Sha512::new();
    sha512.update(body);

    Hashed {
        digests: Digests {
            sha256: Some(hex::encode(sha256.finalize())),
            sha512: Some(hex::encode(sha512.finalize())),
        },
        size: body.len() as u64,
    }
}

/// Converts a base64 digest (as published by electron-builder) to hex
pub fn base64_to_hex(encoded: &str) -> Option<String> {
    STANDARD.decode(encoded.trim()).ok().map(hex::encode)
}
