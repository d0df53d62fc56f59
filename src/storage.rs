use crate::error::{Result, WebOsError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;

/// Default key file name
pub const KEY_FILE_NAME: &str = ".webos-tv-keys.json";

/// Persistence for client keys, keyed by TV address
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get the value stored for `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// All stored pairs
    async fn list(&self) -> Result<Vec<(String, String)>>;
}

/// In-memory store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// JSON file store
///
/// The whole file is read on every access and rewritten on every `set`, so
/// several processes sharing one file see each other's keys.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl FileStore {
    /// Store backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Store in the home directory, or the working directory when the home
    /// directory is not set
    pub fn default_location() -> Self {
        let dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .filter(|p| p.is_dir())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir.join(KEY_FILE_NAME))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                WebOsError::Storage(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut keys = self.load().await?;
        keys.insert(key.to_string(), value.to_string());

        let json = serde_json::to_vec_pretty(&keys)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        tracing::debug!("Stored client key for {} in {}", key, self.path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>> {
        Ok(self.load().await?.into_iter().collect())
    }
}
