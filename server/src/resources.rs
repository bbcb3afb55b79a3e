use crate::error::CmsError;
use crate::models::{NewResource, Resource};
use crate::store::{self, ContentStore, RetryPolicy};
use chrono::{SecondsFormat, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const RESOURCES_PATH: &str = "data/json/resources.json";

/// Where a resource listing is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The content store on the active branch.
    Remote,
    /// The copy of `resources.json` deployed next to the server.
    Snapshot,
}

#[derive(Clone)]
pub struct ResourceService {
    store: Arc<dyn ContentStore>,
    snapshot_path: PathBuf,
    retry: RetryPolicy,
}

/// Millisecond timestamp, bumped past any id already taken.
fn next_id(existing: &[Resource], now_ms: i64) -> String {
    let mut candidate = now_ms;
    while existing.iter().any(|r| r.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}

impl ResourceService {
    /// `data_dir` is the local directory holding `json/resources.json`.
    pub fn new(store: Arc<dyn ContentStore>, data_dir: PathBuf, retry: RetryPolicy) -> Self {
        ResourceService {
            store,
            snapshot_path: data_dir.join("json").join("resources.json"),
            retry,
        }
    }

    pub async fn list(&self, source: Source) -> Result<Vec<Resource>, CmsError> {
        match source {
            Source::Remote => Ok(store::read_json(self.store.as_ref(), RESOURCES_PATH)
                .await?
                .map(|doc| doc.value)
                .unwrap_or_default()),
            Source::Snapshot => match tokio::fs::read(&self.snapshot_path).await {
                Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.snapshot_path.display(), "no resource snapshot");
                    Ok(Vec::new())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    pub async fn create(&self, input: NewResource) -> Result<Resource, CmsError> {
        let name = input.name.trim();
        let url = input.url.trim();
        if name.is_empty() || url.is_empty() {
            return Err(CmsError::Validation("name and url are required".to_string()));
        }

        let name = name.to_string();
        let url = url.to_string();
        let created = store::modify_json::<Vec<Resource>, _, CmsError, _>(
            self.store.as_ref(),
            RESOURCES_PATH,
            &format!("Add resource: {name}"),
            &self.retry,
            |resources| {
                let now = Utc::now();
                let resource = Resource {
                    id: next_id(resources, now.timestamp_millis()),
                    name: name.clone(),
                    description: input.description.clone(),
                    url: url.clone(),
                    created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                };
                resources.push(resource.clone());
                Ok(resource)
            },
        )
        .await?;
        info!(id = %created.id, "resource added");
        Ok(created)
    }

    /// Removes the resource `id`; an unknown id leaves the document untouched.
    pub async fn delete(&self, id: &str) -> Result<(), CmsError> {
        store::modify_json::<Vec<Resource>, _, CmsError, _>(
            self.store.as_ref(),
            RESOURCES_PATH,
            &format!("Delete resource: {id}"),
            &self.retry,
            |resources| {
                let before = resources.len();
                resources.retain(|r| r.id != id);
                match before - resources.len() {
                    0 => Err(CmsError::ResourceNotFound {
                        id: id.to_string(),
                        available_ids: resources.iter().map(|r| r.id.clone()).collect(),
                    }),
                    removed => Ok(removed),
                }
            },
        )
        .await
        .map(|removed| info!(id, removed, "resource deleted"))?;
        Ok(())
    }

    pub async fn replace_all(&self, resources: Vec<Resource>) -> Result<Vec<Resource>, CmsError> {
        if resources
            .iter()
            .any(|r| r.name.trim().is_empty() || r.url.trim().is_empty())
        {
            return Err(CmsError::Validation("name and url are required".to_string()));
        }
        store::modify_json::<Vec<Resource>, _, CmsError, _>(
            self.store.as_ref(),
            RESOURCES_PATH,
            "Update resources",
            &self.retry,
            |current| {
                *current = resources.clone();
                Ok(())
            },
        )
        .await?;
        info!(count = resources.len(), "resources replaced");
        Ok(resources)
    }
}
