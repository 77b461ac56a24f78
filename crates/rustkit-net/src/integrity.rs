//! Subresource integrity verification.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }

    fn digest(&self, body: &[u8]) -> String {
        match self {
            Self::Sha256 => STANDARD.encode(Sha256::digest(body)),
            Self::Sha384 => STANDARD.encode(Sha384::digest(body)),
            Self::Sha512 => STANDARD.encode(Sha512::digest(body)),
        }
    }
}

/// Check `body` against integrity metadata such as `"sha384-abc... sha256-def..."`.
///
/// Only the strongest algorithm present is considered; any of its digests
/// may match. Metadata without a recognised algorithm imposes no constraint.
pub fn verify_integrity(metadata: &str, body: &[u8]) -> Result<()> {
    let parsed: Vec<(Algorithm, &str)> = metadata
        .split_whitespace()
        .filter_map(|token| {
            let (alg, rest) = token.split_once('-')?;
            let digest = rest.split('?').next().unwrap_or(rest);
            Algorithm::parse(alg).map(|a| (a, digest))
        })
        .collect();

    let Some(strongest) = parsed.iter().map(|(alg, _)| *alg).max() else {
        return Ok(());
    };

    let actual = strongest.digest(body);
    if parsed
        .iter()
        .any(|(alg, digest)| *alg == strongest && *digest == actual)
    {
        Ok(())
    } else {
        Err(NetError::RequestFailed(format!(
            "integrity check failed ({strongest:?})"
        )))
    }
}

/// Compute `sha256-<base64>` metadata for a body.
pub fn sha256_integrity(body: &[u8]) -> String {
    format!("sha256-{}", Algorithm::Sha256.digest(body))
}
