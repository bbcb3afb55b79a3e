//! Remote versioned content store.
//!
//! Every file is addressed by its repository path and carries an opaque
//! version token. Writes against an existing file must present the token
//! they read; a stale token is rejected with [`StoreError::VersionConflict`].

pub mod github;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use github::GitHubStore;
pub use memory::InMemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("version conflict on {0}")]
    VersionConflict(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("could not decode {path}: {reason}")]
    Decode { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub bytes: Vec<u8>,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// Ref every read and write is made against.
    fn branch(&self) -> &str;

    async fn get_content(&self, path: &str) -> Result<StoredFile, StoreError>;

    /// Creates or overwrites `path`, returning the new version token.
    ///
    /// `expected_version` must be the current token when the file exists and
    /// `None` only when it does not.
    async fn put_content(
        &self,
        path: &str,
        bytes: Vec<u8>,
        message: &str,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError>;

    async fn delete_content(
        &self,
        path: &str,
        expected_version: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Non-recursive listing of a directory.
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError>;

    /// Timestamp of the most recent revision touching `path`, if any.
    async fn last_revision_at(&self, path: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Publicly fetchable URL for the raw bytes at `path`.
    fn public_url(&self, path: &str) -> String;
}

/// Bounds the reload-and-reapply loop of [`modify_json`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: String,
}

/// Current version token of `path`, `None` if the file does not exist.
pub async fn current_version(
    store: &dyn ContentStore,
    path: &str,
) -> Result<Option<String>, StoreError> {
    match store.get_content(path).await {
        Ok(file) => Ok(Some(file.version)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn read_json<T: DeserializeOwned>(
    store: &dyn ContentStore,
    path: &str,
) -> Result<Option<Versioned<T>>, StoreError> {
    let file = match store.get_content(path).await {
        Ok(file) => file,
        Err(StoreError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let value = serde_json::from_slice(&file.bytes).map_err(|e| StoreError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(Versioned {
        value,
        version: file.version,
    }))
}

/// Pretty-printed JSON with a trailing newline, the on-disk form of every document.
pub fn to_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Loads the JSON document at `path`, lets `mutate` change it and writes it
/// back under the token it was loaded with.
///
/// A missing document starts from `T::default()` and is created. On a
/// version conflict the document is reloaded and `mutate` runs again on the
/// fresh copy, up to `retry.max_attempts` times in total. An error from
/// `mutate` aborts without writing.
pub async fn modify_json<T, R, E, F>(
    store: &dyn ContentStore,
    path: &str,
    message: &str,
    retry: &RetryPolicy,
    mut mutate: F,
) -> Result<R, E>
where
    T: Serialize + DeserializeOwned + Default,
    E: From<StoreError> + From<serde_json::Error>,
    F: FnMut(&mut T) -> Result<R, E>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let (mut value, version) = match read_json::<T>(store, path).await? {
            Some(doc) => (doc.value, Some(doc.version)),
            None => (T::default(), None),
        };

        let outcome = mutate(&mut value)?;
        let bytes = to_json_bytes(&value)?;

        match store
            .put_content(path, bytes, message, version.as_deref())
            .await
        {
            Ok(new_version) => {
                debug!(path, attempt, version = %new_version, "document written");
                return Ok(outcome);
            }
            Err(StoreError::VersionConflict(p)) if attempt < retry.max_attempts.max(1) => {
                warn!(path = %p, attempt, "version conflict, reloading");
                tokio::time::sleep(Duration::from_millis(
                    retry.base_backoff_ms.saturating_mul(attempt as u64),
                ))
                .await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
