use super::{ContentStore, DirEntry, EntryKind, StoreError, StoredFile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// One recorded write, the in-process stand-in for a commit.
#[derive(Debug, Clone)]
pub struct Revision {
    pub path: String,
    pub message: String,
    pub at: DateTime<Utc>,
    pub deleted: bool,
}

/// Revisions kept in the log; older ones are dropped first.
pub const HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, StoredFile>,
    history: VecDeque<Revision>,
    latest: BTreeMap<String, DateTime<Utc>>,
}

impl Inner {
    fn record(&mut self, revision: Revision) {
        self.latest.insert(revision.path.clone(), revision.at);
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(revision);
    }
}

/// Process-local [`ContentStore`] with the same versioning rules as the
/// remote one. Version tokens are the SHA-256 of the file content.
pub struct InMemoryStore {
    branch: String,
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new(branch: &str) -> Self {
        InMemoryStore {
            branch: branch.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written file.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes without any version check, as an out-of-band commit would.
    pub fn force_put(&self, path: &str, bytes: Vec<u8>) -> String {
        let mut inner = self.lock();
        let version = version_of(&bytes);
        inner.files.insert(
            path.to_string(),
            StoredFile {
                bytes,
                version: version.clone(),
            },
        );
        inner.record(Revision {
            path: path.to_string(),
            message: "out-of-band write".to_string(),
            at: Utc::now(),
            deleted: false,
        });
        version
    }

    /// The most recent revisions, oldest first, at most [`HISTORY_LIMIT`].
    pub fn history(&self) -> Vec<Revision> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }
}

fn version_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[async_trait]
impl ContentStore for InMemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    async fn get_content(&self, path: &str) -> Result<StoredFile, StoreError> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn put_content(
        &self,
        path: &str,
        bytes: Vec<u8>,
        message: &str,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        let current = inner.files.get(path).map(|f| f.version.as_str());
        if current != expected_version {
            return Err(StoreError::VersionConflict(path.to_string()));
        }

        let version = version_of(&bytes);
        inner.files.insert(
            path.to_string(),
            StoredFile {
                bytes,
                version: version.clone(),
            },
        );
        inner.record(Revision {
            path: path.to_string(),
            message: message.to_string(),
            at: Utc::now(),
            deleted: false,
        });
        Ok(version)
    }

    async fn delete_content(
        &self,
        path: &str,
        expected_version: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.files.get(path) {
            None => return Err(StoreError::NotFound(path.to_string())),
            Some(file) if file.version != expected_version => {
                return Err(StoreError::VersionConflict(path.to_string()))
            }
            Some(_) => {}
        }
        inner.files.remove(path);
        inner.record(Revision {
            path: path.to_string(),
            message: message.to_string(),
            at: Utc::now(),
            deleted: true,
        });
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        let dir = path.trim_end_matches('/');
        let prefix = format!("{dir}/");
        let inner = self.lock();

        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for key in inner.files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((sub, _)) => {
                    dirs.insert(sub.to_string());
                }
                None => files.push(DirEntry {
                    name: rest.to_string(),
                    path: key.clone(),
                    kind: EntryKind::File,
                }),
            }
        }

        if files.is_empty() && dirs.is_empty() {
            return Err(StoreError::NotFound(dir.to_string()));
        }

        let mut entries: Vec<DirEntry> = dirs
            .into_iter()
            .map(|name| DirEntry {
                path: format!("{prefix}{name}"),
                name,
                kind: EntryKind::Dir,
            })
            .collect();
        entries.extend(files);
        Ok(entries)
    }

    async fn last_revision_at(&self, path: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.lock().latest.get(path).copied())
    }

    fn public_url(&self, path: &str) -> String {
        format!("memory://{}/{}", self.branch, path)
    }
}
