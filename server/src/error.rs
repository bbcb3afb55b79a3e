use crate::store::StoreError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum CmsError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Article not found")]
    ArticleNotFound {
        slug: String,
        available_slugs: Vec<String>,
    },
    #[error("Resource not found")]
    ResourceNotFound {
        id: String,
        available_ids: Vec<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("Invalid password")]
    Unauthorized,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CmsError {
    pub fn status(&self) -> StatusCode {
        match self {
            CmsError::Store(StoreError::NotFound(_))
            | CmsError::ArticleNotFound { .. }
            | CmsError::ResourceNotFound { .. }
            | CmsError::NotFound(_) => StatusCode::NOT_FOUND,
            CmsError::Store(StoreError::VersionConflict(_)) => StatusCode::CONFLICT,
            CmsError::Validation(_) => StatusCode::BAD_REQUEST,
            CmsError::Unauthorized => StatusCode::UNAUTHORIZED,
            CmsError::Store(_) | CmsError::Json(_) | CmsError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> Value {
        match self {
            CmsError::ArticleNotFound {
                slug,
                available_slugs,
            } => json!({
                "error": self.to_string(),
                "requestedSlug": slug,
                "availableSlugs": available_slugs,
            }),
            CmsError::ResourceNotFound { id, available_ids } => json!({
                "error": self.to_string(),
                "requestedId": id,
                "availableIds": available_ids,
            }),
            CmsError::Store(StoreError::VersionConflict(path)) => json!({
                "error": format!("{path} was changed by another writer, reload and try again"),
            }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl From<JsonRejection> for CmsError {
    fn from(rejection: JsonRejection) -> Self {
        CmsError::Validation(format!("Invalid request: {}", rejection.body_text()))
    }
}

impl IntoResponse for CmsError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(
            CmsError::Store(StoreError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CmsError::Store(StoreError::VersionConflict("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CmsError::Store(StoreError::Upstream("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(CmsError::Validation("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(CmsError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn article_not_found_carries_debug_fields() {
        let err = CmsError::ArticleNotFound {
            slug: "missing".into(),
            available_slugs: vec!["hello-world".into()],
        };
        let body = err.body();
        assert_eq!(body["error"], "Article not found");
        assert_eq!(body["requestedSlug"], "missing");
        assert_eq!(body["availableSlugs"][0], "hello-world");
    }
}
