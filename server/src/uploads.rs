use crate::error::CmsError;
use crate::store::ContentStore;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::info;

pub const UPLOAD_ROOT: &str = "uploads/images";
const SUFFIX_LEN: usize = 6;

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn ContentStore>,
}

/// File extension for an image upload, from the MIME subtype or the client's file name.
fn extension(content_type: &str, file_name: Option<&str>) -> String {
    let subtype = content_type
        .split(';')
        .next()
        .and_then(|mime| mime.trim().strip_prefix("image/"))
        .unwrap_or_default();
    let from_mime = match subtype {
        "svg+xml" => "svg",
        "jpeg" | "pjpeg" => "jpg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        other => other,
    };
    if !from_mime.is_empty() && from_mime.chars().all(|c| c.is_ascii_alphanumeric()) {
        return from_mime.to_ascii_lowercase();
    }
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| char::from(b).to_ascii_lowercase())
        .take(SUFFIX_LEN)
        .collect()
}

impl UploadService {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        UploadService { store }
    }

    /// Commits an image under `uploads/images/` and returns its public raw URL.
    pub async fn store_image(
        &self,
        content_type: &str,
        file_name: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<String, CmsError> {
        if !content_type.trim().starts_with("image/") {
            return Err(CmsError::Validation("Only image uploads are allowed".to_string()));
        }
        if bytes.is_empty() {
            return Err(CmsError::Validation("No file uploaded".to_string()));
        }

        let path = format!(
            "{UPLOAD_ROOT}/{}_{}.{}",
            Utc::now().timestamp_millis(),
            random_suffix(),
            extension(content_type, file_name)
        );
        let len = bytes.len();
        self.store
            .put_content(&path, bytes, &format!("Upload image: {path}"), None)
            .await?;
        info!(%path, len, "image uploaded");
        Ok(self.store.public_url(&path))
    }
}
