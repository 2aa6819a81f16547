//! Manifest text format.
//!
//! One line per artifact, `<artifact_name> <sha256_hex>`, followed by an
//! optional signature block over the entry lines:
//!
//! ```text
//! evidence/cycle/attempt-0001/summary.json 3a7bd3e2...
//! -----BEGIN GATEKEEP SIGNATURE-----
//! algorithm: hmac-sha256
//! key_id: release-ci
//! value: 9f86d081...
//! -----END GATEKEEP SIGNATURE-----
//! ```

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{EvidenceIntegrityError, GatekeepError, Result};
use crate::store::validate_key;

const SIGNATURE_BEGIN: &str = "-----BEGIN GATEKEEP SIGNATURE-----";
const SIGNATURE_END: &str = "-----END GATEKEEP SIGNATURE-----";
pub const SIGNATURE_ALGORITHM: &str = "hmac-sha256";
pub const SIGNATURE_ARTIFACT: &str = "<signature>";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub algorithm: String,
    pub key_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry(entry)?;
        }
        Ok(Self {
            entries,
            signature: None,
        })
    }

    /// Concatenates gate manifests into a release manifest. Gate signatures
    /// are not carried over; the release manifest is signed on its own.
    pub fn concat<'a>(manifests: impl IntoIterator<Item = &'a Manifest>) -> Result<Self> {
        let mut entries = Vec::new();
        for manifest in manifests {
            for entry in &manifest.entries {
                if entries
                    .iter()
                    .any(|existing: &ManifestEntry| existing.name == entry.name)
                {
                    return Err(GatekeepError::Conflict(format!(
                        "artifact listed twice in release manifest: {}",
                        entry.name
                    )));
                }
                entries.push(entry.clone());
            }
        }
        Self::new(entries)
    }

    /// The signed portion: entry lines only.
    #[must_use]
    pub fn body(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.name);
            out.push(' ');
            out.push_str(&entry.sha256);
            out.push('\n');
        }
        out
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.body();
        if let Some(signature) = &self.signature {
            out.push_str(SIGNATURE_BEGIN);
            out.push('\n');
            out.push_str(&format!("algorithm: {}\n", signature.algorithm));
            out.push_str(&format!("key_id: {}\n", signature.key_id));
            out.push_str(&format!("value: {}\n", signature.value));
            out.push_str(SIGNATURE_END);
            out.push('\n');
        }
        out
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut lines = raw.lines().enumerate();
        let mut signature = None;

        while let Some((line_no, line)) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            if line == SIGNATURE_BEGIN {
                signature = Some(parse_signature_block(&mut lines)?);
                if let Some((extra_no, _)) = lines.find(|(_, rest)| !rest.trim().is_empty()) {
                    return Err(GatekeepError::Validation(format!(
                        "manifest has content after signature block (line {})",
                        extra_no + 1
                    )));
                }
                break;
            }
            let mut parts = line.split(' ');
            let (Some(name), Some(sha256), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(GatekeepError::Validation(format!(
                    "malformed manifest line {}: '{line}'",
                    line_no + 1
                )));
            };
            let entry = ManifestEntry {
                name: name.to_string(),
                sha256: sha256.to_string(),
            };
            validate_entry(&entry)?;
            entries.push(entry);
        }

        Ok(Self { entries, signature })
    }
}

fn validate_entry(entry: &ManifestEntry) -> Result<()> {
    validate_key(&entry.name)?;
    let is_hex_digest =
        entry.sha256.len() == 64 && entry.sha256.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
    if !is_hex_digest {
        return Err(GatekeepError::Validation(format!(
            "manifest entry {} has invalid sha256 '{}'",
            entry.name, entry.sha256
        )));
    }
    Ok(())
}

fn parse_signature_block<'a>(
    lines: &mut impl Iterator<Item = (usize, &'a str)>,
) -> Result<SignatureBlock> {
    let mut algorithm = None;
    let mut key_id = None;
    let mut value = None;
    for (line_no, line) in lines.by_ref() {
        if line == SIGNATURE_END {
            return match (algorithm, key_id, value) {
                (Some(algorithm), Some(key_id), Some(value)) => Ok(SignatureBlock {
                    algorithm,
                    key_id,
                    value,
                }),
                _ => Err(GatekeepError::Validation(
                    "signature block is missing algorithm, key_id or value".to_string(),
                )),
            };
        }
        let Some((field, raw)) = line.split_once(": ") else {
            return Err(GatekeepError::Validation(format!(
                "malformed signature line {}: '{line}'",
                line_no + 1
            )));
        };
        let raw = raw.to_string();
        match field {
            "algorithm" => algorithm = Some(raw),
            "key_id" => key_id = Some(raw),
            "value" => value = Some(raw),
            other => {
                return Err(GatekeepError::Validation(format!(
                    "unknown signature field '{other}'"
                )));
            }
        }
    }
    Err(GatekeepError::Validation(
        "signature block is not terminated".to_string(),
    ))
}

/// HMAC-SHA256 signer for manifest bodies.
#[derive(Clone)]
pub struct ManifestSigner {
    key_id: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ManifestSigner {
    pub fn new(key_id: &str, key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Err(GatekeepError::Validation(
                "manifest signing key is empty".to_string(),
            ));
        }
        if key_id.trim().is_empty() || key_id.contains('\n') {
            return Err(GatekeepError::Validation(
                "manifest signing key id is invalid".to_string(),
            ));
        }
        Ok(Self {
            key_id: key_id.trim().to_string(),
            key: key.to_vec(),
        })
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|_| GatekeepError::Validation("invalid manifest signing key".to_string()))
    }

    pub fn sign(&self, manifest: &mut Manifest) -> Result<()> {
        let mut mac = self.mac()?;
        mac.update(manifest.body().as_bytes());
        let digest = mac.finalize().into_bytes();
        manifest.signature = Some(SignatureBlock {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            key_id: self.key_id.clone(),
            value: format!("{digest:x}"),
        });
        Ok(())
    }

    /// Signature mismatches surface as integrity errors on the signature pseudo-artifact.
    pub fn verify(&self, manifest: &Manifest) -> Result<()> {
        let Some(signature) = &manifest.signature else {
            return Err(EvidenceIntegrityError {
                artifact: SIGNATURE_ARTIFACT.to_string(),
                expected_hash: format!("{SIGNATURE_ALGORITHM} signature by {}", self.key_id),
                actual_hash: "unsigned".to_string(),
            }
            .into());
        };
        let mut mac = self.mac()?;
        mac.update(manifest.body().as_bytes());
        let expected = mac.clone().finalize().into_bytes();
        let matches = signature.algorithm == SIGNATURE_ALGORITHM
            && signature.key_id == self.key_id
            && decode_hex(&signature.value).is_some_and(|raw| mac.verify_slice(&raw).is_ok());
        if matches {
            return Ok(());
        }
        Err(EvidenceIntegrityError {
            artifact: SIGNATURE_ARTIFACT.to_string(),
            expected_hash: format!("{expected:x}"),
            actual_hash: signature.value.clone(),
        }
        .into())
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(raw.get(index..index + 2)?, 16).ok())
        .collect()
}
