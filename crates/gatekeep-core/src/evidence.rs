use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::{EvidenceIntegrityError, GatekeepError, Result};
use crate::manifest::{Manifest, ManifestEntry, ManifestSigner};
use crate::models::{
    CheckArtifact, CheckResult, ContractChange, EvidenceRecord, EvidenceSummary,
    PromotionDecision,
};
use crate::store::{ArtifactStore, sha256_hex, validate_key};

const EVIDENCE_PREFIX: &str = "evidence";
const ATTEMPT_PREFIX: &str = "attempt-";
const MISSING_ARTIFACT_HASH: &str = "missing";

#[must_use]
pub fn record_key(record_id: &str) -> String {
    format!("{EVIDENCE_PREFIX}/{record_id}/record.json")
}

#[must_use]
pub fn release_manifest_key(release_id: &str) -> String {
    format!("release/{release_id}/manifest.sha256")
}

#[must_use]
pub fn release_decision_key(release_id: &str) -> String {
    format!("release/{release_id}/decision.json")
}

fn attempt_dir(gate_id: &str, attempt: u32) -> String {
    format!("{EVIDENCE_PREFIX}/{gate_id}/{ATTEMPT_PREFIX}{attempt:04}")
}

/// Rejects artifact keys the store would refuse, before any file of the
/// attempt exists. A key may not also be the directory of another key.
fn check_artifact_keys(keys: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for key in keys {
        validate_key(key)?;
        if !seen.insert(key.as_str()) {
            return Err(GatekeepError::Conflict(format!("artifact {key} is listed twice")));
        }
    }
    for key in &seen {
        let dir = format!("{key}/");
        if let Some(nested) = seen.iter().find(|other| other.starts_with(&dir)) {
            return Err(GatekeepError::Conflict(format!(
                "artifact {key} is also the directory of {nested}"
            )));
        }
    }
    Ok(())
}

fn pretty_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Summary bytes depend on the CheckResult alone.
pub fn render_summary(result: &CheckResult) -> Result<Vec<u8>> {
    pretty_json(&EvidenceSummary::from_check_result(result))
}

/// Writes per-attempt evidence into an append-only store.
pub struct EvidenceRecorder {
    store: Arc<dyn ArtifactStore>,
    signer: Option<ManifestSigner>,
    gate_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for EvidenceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceRecorder")
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

impl EvidenceRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>, signer: Option<ManifestSigner>) -> Self {
        Self {
            store,
            signer,
            gate_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    fn gate_lock(&self, gate_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .gate_locks
            .lock()
            .map_err(|_| GatekeepError::Internal("evidence lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(gate_id.to_string()).or_default()))
    }

    /// Highest attempt number with any file on record, or 0.
    pub fn last_attempt(&self, gate_id: &str) -> Result<u32> {
        let prefix = format!("{EVIDENCE_PREFIX}/{gate_id}/");
        let last = self
            .store
            .list(&prefix)?
            .iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)?
                    .split('/')
                    .next()?
                    .strip_prefix(ATTEMPT_PREFIX)?
                    .parse::<u32>()
                    .ok()
            })
            .max()
            .unwrap_or(0);
        Ok(last)
    }

    pub fn record(
        &self,
        gate_id: &str,
        result: CheckResult,
        artifacts: &[CheckArtifact],
    ) -> Result<EvidenceRecord> {
        self.write_attempt(gate_id, None, result, artifacts, None, None)
    }

    /// Records under a caller-assigned attempt number, which must be above
    /// every attempt already on record.
    pub fn record_attempt(
        &self,
        gate_id: &str,
        attempt: u32,
        result: CheckResult,
        artifacts: &[CheckArtifact],
    ) -> Result<EvidenceRecord> {
        self.write_attempt(gate_id, Some(attempt), result, artifacts, None, None)
    }

    /// Reads artifacts from disk; each is stored under its file name.
    pub fn record_paths(
        &self,
        gate_id: &str,
        result: CheckResult,
        artifact_paths: &[PathBuf],
    ) -> Result<EvidenceRecord> {
        let mut artifacts = Vec::with_capacity(artifact_paths.len());
        for path in artifact_paths {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    GatekeepError::Validation(format!(
                        "artifact path has no usable file name: {}",
                        path.display()
                    ))
                })?;
            artifacts.push(CheckArtifact::from_path(name, path)?);
        }
        self.record(gate_id, result, &artifacts)
    }

    /// Records a new attempt that supersedes `superseded`. The old record stays untouched.
    pub fn record_correction(
        &self,
        superseded: &EvidenceRecord,
        result: CheckResult,
        artifacts: &[CheckArtifact],
        reason: &str,
    ) -> Result<EvidenceRecord> {
        if reason.trim().is_empty() {
            return Err(GatekeepError::Validation(
                "a correction needs a reason".to_string(),
            ));
        }
        if result.gate_id != superseded.gate_id {
            return Err(GatekeepError::Validation(format!(
                "correction for gate {} cannot supersede a record of gate {}",
                result.gate_id, superseded.gate_id
            )));
        }
        self.write_attempt(
            &superseded.gate_id,
            None,
            result,
            artifacts,
            Some(superseded.record_id.clone()),
            Some(reason.trim().to_string()),
        )
    }

    fn write_attempt(
        &self,
        gate_id: &str,
        requested: Option<u32>,
        result: CheckResult,
        artifacts: &[CheckArtifact],
        supersedes: Option<String>,
        correction_reason: Option<String>,
    ) -> Result<EvidenceRecord> {
        if result.gate_id != gate_id {
            return Err(GatekeepError::Validation(format!(
                "check result of gate {} recorded under gate {gate_id}",
                result.gate_id
            )));
        }
        let lock = self.gate_lock(gate_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| GatekeepError::Internal(format!("evidence lock of {gate_id} poisoned")))?;

        let last = self.last_attempt(gate_id)?;
        let attempt = match requested {
            Some(attempt) if attempt <= last => {
                return Err(GatekeepError::Conflict(format!(
                    "attempt {attempt} of gate {gate_id} is not above recorded attempt {last}"
                )));
            }
            Some(attempt) => attempt,
            None => last + 1,
        };
        let dir = attempt_dir(gate_id, attempt);
        let artifact_refs = artifacts
            .iter()
            .map(|artifact| format!("{dir}/artifacts/{}", artifact.name))
            .collect::<Vec<_>>();
        check_artifact_keys(&artifact_refs)?;

        let mut entries = Vec::with_capacity(artifacts.len() + 1);
        let summary_ref = format!("{dir}/summary.json");
        let summary = render_summary(&result)?;
        self.store.put(&summary_ref, &summary)?;
        entries.push(ManifestEntry {
            name: summary_ref.clone(),
            sha256: sha256_hex(&summary),
        });

        for (key, artifact) in artifact_refs.iter().zip(artifacts) {
            self.store.put(key, &artifact.content)?;
            entries.push(ManifestEntry {
                name: key.clone(),
                sha256: sha256_hex(&artifact.content),
            });
        }

        let mut manifest = Manifest::new(entries)?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut manifest)?;
        }
        let manifest_ref = format!("{dir}/manifest.sha256");
        let rendered = manifest.render();
        self.store.put(&manifest_ref, rendered.as_bytes())?;

        let record = EvidenceRecord {
            record_id: format!("{gate_id}/{ATTEMPT_PREFIX}{attempt:04}"),
            gate_id: gate_id.to_string(),
            attempt,
            status: result.status,
            check_result: result,
            summary_ref,
            manifest_ref,
            manifest_sha256: sha256_hex(rendered.as_bytes()),
            artifact_refs,
            supersedes,
            correction_reason,
            recorded_at: Utc::now().to_rfc3339(),
        };
        self.store
            .put(&record_key(&record.record_id), &pretty_json(&record)?)?;
        Ok(record)
    }

    pub fn load_record(&self, record_id: &str) -> Result<EvidenceRecord> {
        let raw = self.store.get(&record_key(record_id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn load_manifest(&self, key: &str) -> Result<Manifest> {
        let raw = self.store.get(key)?;
        let text = String::from_utf8(raw).map_err(|_| {
            GatekeepError::Validation(format!("manifest {key} is not valid UTF-8"))
        })?;
        Manifest::parse(&text)
    }

    /// Re-hashes every listed artifact. The signature is checked first when a
    /// signer is configured.
    pub fn verify(&self, manifest: &Manifest) -> Result<()> {
        if let Some(signer) = &self.signer {
            signer.verify(manifest)?;
        }
        for entry in &manifest.entries {
            let actual = match self.store.hash(&entry.name) {
                Ok(actual) => actual,
                Err(GatekeepError::NotFound(_)) => MISSING_ARTIFACT_HASH.to_string(),
                Err(err) => return Err(err),
            };
            if actual != entry.sha256 {
                return Err(EvidenceIntegrityError {
                    artifact: entry.name.clone(),
                    expected_hash: entry.sha256.clone(),
                    actual_hash: actual,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn verify_key(&self, manifest_key: &str) -> Result<Manifest> {
        let manifest = self.load_manifest(manifest_key)?;
        self.verify(&manifest)?;
        Ok(manifest)
    }

    /// Verifies a record end to end: its manifest file against the digest in
    /// the record, then every artifact the manifest lists.
    pub fn verify_record(&self, record: &EvidenceRecord) -> Result<Manifest> {
        let actual = match self.store.hash(&record.manifest_ref) {
            Ok(actual) => actual,
            Err(GatekeepError::NotFound(_)) => MISSING_ARTIFACT_HASH.to_string(),
            Err(err) => return Err(err),
        };
        if actual != record.manifest_sha256 {
            return Err(EvidenceIntegrityError {
                artifact: record.manifest_ref.clone(),
                expected_hash: record.manifest_sha256.clone(),
                actual_hash: actual,
            }
            .into());
        }
        self.verify_key(&record.manifest_ref)
    }

    pub fn write_contract_change(&self, change: &ContractChange) -> Result<String> {
        self.store.put(&change.evidence_ref, &pretty_json(change)?)?;
        Ok(change.evidence_ref.clone())
    }

    /// Writes the signed release manifest; returns its key.
    pub fn write_release_manifest(&self, release_id: &str, gates: &[Manifest]) -> Result<String> {
        let mut manifest = Manifest::concat(gates)?;
        if let Some(signer) = &self.signer {
            signer.sign(&mut manifest)?;
        }
        let key = release_manifest_key(release_id);
        self.store.put(&key, manifest.render().as_bytes())?;
        Ok(key)
    }

    pub fn write_decision(&self, decision: &PromotionDecision) -> Result<String> {
        self.store
            .put(&decision.decision_ref, &pretty_json(decision)?)?;
        Ok(decision.decision_ref.clone())
    }
}
