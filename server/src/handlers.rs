use crate::articles::NewArticle;
use crate::error::CmsError;
use crate::models::{ArticleInput, Category, NewResource, Resource};
use crate::resources::Source;
use crate::state::AppState;
use axum::extract::{FromRequest, Multipart, Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

type ApiResult = Result<axum::response::Response, CmsError>;

/// JSON request body whose rejections answer as [`CmsError::Validation`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(CmsError))]
pub struct JsonBody<T>(pub T);

#[derive(Deserialize)]
pub struct ArticlesQuery {
    path: Option<String>,
}

#[derive(Deserialize)]
pub struct SaveArticle {
    article: ArticleInput,
}

#[derive(Deserialize)]
pub struct DeleteArticle {
    slug: String,
}

#[derive(Deserialize)]
pub struct ReplaceCategories {
    categories: Vec<Category>,
}

#[derive(Deserialize)]
pub struct ResourcesQuery {
    source: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum ResourcePayload {
    Many(Vec<Resource>),
    One(NewResource),
}

#[derive(Deserialize)]
pub struct Login {
    password: String,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "branch": state.store.branch(),
        "backend": state.store.backend_tag(),
    }))
}

pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ArticlesQuery>,
) -> ApiResult {
    match query.path {
        Some(path) => Ok(Json(state.articles.get_by_path(&path).await?).into_response()),
        None => Ok(Json(state.articles.list().await?).into_response()),
    }
}

pub async fn get_article(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    Ok(Json(state.articles.get_by_slug(&slug).await?).into_response())
}

pub async fn save_article(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<SaveArticle>,
) -> ApiResult {
    let saved = state.articles.save(body.article).await?;
    Ok(Json(json!({ "success": true, "slug": saved.slug })).into_response())
}

pub async fn update_article(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    JsonBody(input): JsonBody<ArticleInput>,
) -> ApiResult {
    let updated = state.articles.update(&slug, input).await?;
    Ok(Json(json!({ "success": true, "slug": updated.slug, "article": updated })).into_response())
}

pub async fn delete_article(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<DeleteArticle>,
) -> ApiResult {
    state.articles.delete(&body.slug).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn create_article(
    State(state): State<AppState>,
    JsonBody(article): JsonBody<NewArticle>,
) -> ApiResult {
    let slug = state.articles.create_new(article).await?;
    Ok(Json(json!({ "message": "Article created successfully", "slug": slug })).into_response())
}

pub async fn sync_articles(State(state): State<AppState>) -> ApiResult {
    let articles = state.articles.sync().await?;
    Ok(Json(json!({ "success": true, "count": articles.len(), "articles": articles })).into_response())
}

pub async fn repair_articles(State(state): State<AppState>) -> ApiResult {
    let report = state.articles.repair().await?;
    Ok(Json(json!({
        "success": true,
        "repaired": report.repaired,
        "rewritten": report.rewritten,
    }))
    .into_response())
}

pub async fn list_categories(State(state): State<AppState>) -> ApiResult {
    Ok(Json(state.categories.list().await?).into_response())
}

pub async fn replace_categories(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ReplaceCategories>,
) -> ApiResult {
    state.categories.update(body.categories).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ResourcesQuery>,
) -> ApiResult {
    let source = match query.source.as_deref() {
        Some("github") => Source::Remote,
        _ => Source::Snapshot,
    };
    Ok(Json(state.resources.list(source).await?).into_response())
}

pub async fn save_resources(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResourcePayload>,
) -> ApiResult {
    match payload {
        ResourcePayload::One(input) => {
            let resource = state.resources.create(input).await?;
            Ok(Json(json!({ "success": true, "resource": resource })).into_response())
        }
        ResourcePayload::Many(resources) => {
            Ok(Json(state.resources.replace_all(resources).await?).into_response())
        }
    }
}

pub async fn delete_resource(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.resources.delete(&id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

pub async fn upload_image(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CmsError::Validation(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| CmsError::Validation(format!("malformed upload: {e}")))?;
        debug!(%content_type, len = bytes.len(), "upload received");

        let url = state
            .uploads
            .store_image(&content_type, file_name.as_deref(), bytes.to_vec())
            .await?;
        return Ok(Json(json!({ "success": true, "url": url })).into_response());
    }
    Err(CmsError::Validation("No file uploaded".to_string()))
}

pub async fn login(State(state): State<AppState>, JsonBody(body): JsonBody<Login>) -> ApiResult {
    let cookie = state.auth.login(&body.password)?;
    Ok(([(SET_COOKIE, cookie)], Json(json!({ "success": true }))).into_response())
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(SET_COOKIE, state.auth.logout_cookie())],
        Json(json!({ "success": true })),
    )
}

pub async fn check_auth(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    Json(json!({ "isLoggedIn": state.auth.check(&headers) }))
}
