use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{GatekeepError, Result};

/// Append-only artifact storage addressed by `/`-separated relative keys.
pub trait ArtifactStore: Send + Sync {
    /// Writes a new artifact. Writing an existing key is a `Conflict`.
    fn put(&self, key: &str, content: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Hex-encoded SHA-256 of the stored bytes.
    fn hash(&self, key: &str) -> Result<String>;

    /// Keys under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(GatekeepError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[must_use]
pub fn sha256_hex(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{digest:x}")
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(GatekeepError::Validation("artifact key is empty".to_string()));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(GatekeepError::Validation(format!(
            "artifact key must not contain whitespace: {key}"
        )));
    }
    let path = Path::new(key);
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GatekeepError::PathTraversal(key.to_string()));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn key_from_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|component| match component {
                Component::Normal(value) => value.to_str().map(ToString::to_string),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        if path.exists() {
            return Err(GatekeepError::Conflict(format!(
                "artifact already recorded: {key}"
            )));
        }
        let parent = path
            .parent()
            .ok_or_else(|| GatekeepError::Validation(format!("artifact key has no parent: {key}")))?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("artifact");
        let staging = parent.join(format!(".{file_name}.{}.partial", uuid::Uuid::new_v4()));
        {
            let mut file = fs::File::create_new(&staging)?;
            file.write_all(content)?;
            file.sync_all()?;
        }
        // hard_link fails when the target exists, so a racing writer cannot be overwritten.
        let linked = fs::hard_link(&staging, &path);
        let _ = fs::remove_file(&staging);
        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(
                GatekeepError::Conflict(format!("artifact already recorded: {key}")),
            ),
            Err(err) => Err(err.into()),
        }
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(GatekeepError::NotFound(key.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn hash(&self, key: &str) -> Result<String> {
        let path = self.resolve(key)?;
        if !path.is_file() {
            return Err(GatekeepError::NotFound(key.to_string()));
        }
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        let digest = hasher.finalize();
        Ok(format!("{digest:x}"))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let trimmed = prefix.trim_end_matches('/');
        let base = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.resolve(trimmed)?
        };
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|err| GatekeepError::Io(io::Error::other(err)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_partial = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".partial"));
            if is_partial {
                continue;
            }
            if let Some(key) = self.key_from_path(entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
