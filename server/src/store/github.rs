use super::{ContentStore, DirEntry, EntryKind, StoreError, StoredFile};
use crate::config::GitHubConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const API_VERSION: &str = "2022-11-28";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

/// [`ContentStore`] over the GitHub repository contents API.
///
/// The version token is the blob SHA GitHub reports for each file, and every
/// write becomes a commit on the configured branch.
pub struct GitHubStore {
    client: reqwest::Client,
    api_url: Url,
    raw_url: String,
    owner: String,
    repo: String,
    branch: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentItem>),
    File(FileContent),
}

#[derive(Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct FileContent {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Deserialize)]
struct CommitItem {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Signature,
}

#[derive(Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

#[derive(Deserialize, Default)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

impl GitHubStore {
    pub fn new(config: &GitHubConfig, branch: &str) -> Result<Self, StoreError> {
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| StoreError::Upstream(format!("invalid API url: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            HeaderName::from_static("x-github-api-version"),
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("gitcms"));
        if !config.token.is_empty() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", config.token))
                .map_err(|e| StoreError::Upstream(format!("invalid token header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Upstream(format!("http client: {e}")))?;

        Ok(GitHubStore {
            client,
            api_url,
            raw_url: config.raw_url.trim_end_matches('/').to_string(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: branch.to_string(),
        })
    }

    fn repo_url(&self, tail: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["repos", self.owner.as_str(), self.repo.as_str()])
                .extend(tail.iter().copied());
        }
        url
    }

    fn contents_url(&self, path: &str) -> Url {
        let mut tail = vec!["contents"];
        tail.extend(path.split('/').filter(|s| !s.is_empty()));
        self.repo_url(&tail)
    }

    async fn fetch_contents(&self, path: &str) -> Result<ContentsResponse, StoreError> {
        let resp = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        if !resp.status().is_success() {
            return Err(failure(path, resp).await);
        }
        resp.json::<ContentsResponse>().await.map_err(|e| StoreError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Files above the inline size limit come back without content.
    async fn fetch_raw(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .header(ACCEPT, RAW_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        if !resp.status().is_success() {
            return Err(failure(path, resp).await);
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| transport(path, e))
    }
}

fn transport(path: &str, err: reqwest::Error) -> StoreError {
    StoreError::Upstream(format!("request for {path} failed: {err}"))
}

async fn failure(path: &str, resp: reqwest::Response) -> StoreError {
    let status = resp.status();
    let message = resp.json::<ApiMessage>().await.unwrap_or_default().message;
    debug!(path, %status, api_message = %message, "github request rejected");
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(path.to_string()),
        StatusCode::CONFLICT => StoreError::VersionConflict(path.to_string()),
        // Writing an existing file without its sha is a 422.
        StatusCode::UNPROCESSABLE_ENTITY if message.contains("sha") => {
            StoreError::VersionConflict(path.to_string())
        }
        _ => StoreError::Upstream(format!("{status} for {path}: {message}")),
    }
}

fn decode_base64(path: &str, content: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64.decode(compact).map_err(|e| StoreError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl ContentStore for GitHubStore {
    fn backend_tag(&self) -> &'static str {
        "github"
    }

    fn branch(&self) -> &str {
        &self.branch
    }

    #[instrument(name = "github_get_content", skip(self), fields(branch = %self.branch))]
    async fn get_content(&self, path: &str) -> Result<StoredFile, StoreError> {
        let file = match self.fetch_contents(path).await? {
            ContentsResponse::File(file) => file,
            ContentsResponse::Dir(_) => {
                return Err(StoreError::Decode {
                    path: path.to_string(),
                    reason: "is a directory".to_string(),
                })
            }
        };
        let bytes = if file.encoding == "base64" {
            decode_base64(path, &file.content)?
        } else {
            self.fetch_raw(path).await?
        };
        Ok(StoredFile {
            bytes,
            version: file.sha,
        })
    }

    #[instrument(name = "github_put_content", skip(self, bytes), fields(branch = %self.branch, len = bytes.len()))]
    async fn put_content(
        &self,
        path: &str,
        bytes: Vec<u8>,
        message: &str,
        expected_version: Option<&str>,
    ) -> Result<String, StoreError> {
        let body = PutRequest {
            message,
            content: BASE64.encode(&bytes),
            branch: &self.branch,
            sha: expected_version,
        };
        let resp = self
            .client
            .put(self.contents_url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        if !resp.status().is_success() {
            return Err(failure(path, resp).await);
        }
        let written: PutResponse = resp.json().await.map_err(|e| StoreError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(written.content.sha)
    }

    #[instrument(name = "github_delete_content", skip(self), fields(branch = %self.branch))]
    async fn delete_content(
        &self,
        path: &str,
        expected_version: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let body = DeleteRequest {
            message,
            sha: expected_version,
            branch: &self.branch,
        };
        let resp = self
            .client
            .delete(self.contents_url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        if !resp.status().is_success() {
            return Err(failure(path, resp).await);
        }
        Ok(())
    }

    #[instrument(name = "github_list_directory", skip(self), fields(branch = %self.branch))]
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, StoreError> {
        match self.fetch_contents(path).await? {
            ContentsResponse::Dir(items) => Ok(items
                .into_iter()
                .map(|item| DirEntry {
                    kind: if item.kind == "dir" {
                        EntryKind::Dir
                    } else {
                        EntryKind::File
                    },
                    name: item.name,
                    path: item.path,
                })
                .collect()),
            ContentsResponse::File(_) => Err(StoreError::Decode {
                path: path.to_string(),
                reason: "not a directory".to_string(),
            }),
        }
    }

    #[instrument(name = "github_last_revision", skip(self), fields(branch = %self.branch))]
    async fn last_revision_at(&self, path: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let resp = self
            .client
            .get(self.repo_url(&["commits"]))
            .query(&[("path", path), ("sha", self.branch.as_str()), ("per_page", "1")])
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        if !resp.status().is_success() {
            return Err(failure(path, resp).await);
        }
        let commits: Vec<CommitItem> = resp.json().await.map_err(|e| StoreError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(commits.into_iter().next().map(|c| c.commit.committer.date))
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.raw_url,
            self.owner,
            self.repo,
            self.branch,
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(api_url: &str) -> GitHubStore {
        let config = GitHubConfig {
            owner: "octo".into(),
            repo: "blog".into(),
            token: "t".into(),
            api_url: api_url.into(),
            raw_url: "https://raw.example.com/".into(),
        };
        GitHubStore::new(&config, "dev").unwrap()
    }

    #[test]
    fn builds_contents_url_per_segment() {
        let s = store("https://api.github.com");
        assert_eq!(
            s.contents_url("data/md/hello world.md").as_str(),
            "https://api.github.com/repos/octo/blog/contents/data/md/hello%20world.md"
        );
    }

    #[test]
    fn keeps_enterprise_api_prefix() {
        let s = store("https://ghe.example.com/api/v3/");
        assert_eq!(
            s.repo_url(&["commits"]).as_str(),
            "https://ghe.example.com/api/v3/repos/octo/blog/commits"
        );
    }

    #[test]
    fn raw_url_points_at_branch() {
        let s = store("https://api.github.com");
        assert_eq!(
            s.public_url("uploads/images/1_abc.png"),
            "https://raw.example.com/octo/blog/dev/uploads/images/1_abc.png"
        );
    }

    #[test]
    fn decodes_wrapped_base64() {
        let bytes = decode_base64("x", "aGVs\nbG8=\n").unwrap();
        assert_eq!(bytes, b"hello");
    }
}
