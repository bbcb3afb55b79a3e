use axum::body::{to_bytes, Body};
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use gitcms::config::Config;
use gitcms::server::build_router;
use gitcms::state::AppState;
use gitcms::store::{ContentStore, InMemoryStore};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "open-sesame";

fn app() -> (Arc<InMemoryStore>, Router) {
    let config = Config::from_lookup(|key| match key {
        "CMS_STORE" => Some("memory".to_string()),
        "ACCESS_PASSWORD" => Some(PASSWORD.to_string()),
        "CMS_RETRY_BACKOFF_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    let store = Arc::new(InMemoryStore::new(config.active_branch()));
    let state = AppState::new(config, store.clone()).unwrap();
    (store, build_router(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seed_categories(app: &Router) {
    let (status, _, _) = send(
        app,
        json_request(
            "POST",
            "/api/categories",
            json!({ "categories": [{ "slug": "ai", "name": "Artificial Intelligence" }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn session_cookie(app: &Router) -> String {
    let (status, headers, _) = send(
        app,
        json_request("POST", "/api/login", json!({ "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let set_cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_branch_and_backend() {
    let (_, app) = app();
    let (status, _, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "branch": "main", "backend": "memory" }));
}

#[tokio::test]
async fn created_article_is_listed_and_fetchable() {
    let (store, app) = app();
    seed_categories(&app).await;

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/api/articles",
            json!({ "article": { "title": "Hello World", "content": "body", "category": "ai" } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "slug": "hello-world" }));
    assert!(store.get_content("data/md/hello-world.md").await.is_ok());

    let (_, _, list) = send(&app, get("/api/articles")).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["slug"], "hello-world");
    assert_eq!(list[0]["category"], "ai");
    assert_eq!(list[0]["categoryName"], "Artificial Intelligence");
    assert_eq!(list[0]["path"], "data/md/hello-world.md");

    let (status, _, article) = send(&app, get("/api/articles/hello-world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(article["content"], "body");
    assert_eq!(article["title"], "Hello World");

    let (status, _, by_path) = send(&app, get("/api/articles?path=data/md/hello-world.md")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_path["slug"], "hello-world");
}

#[tokio::test]
async fn put_updates_content_in_place() {
    let (_, app) = app();
    send(
        &app,
        json_request(
            "POST",
            "/api/articles",
            json!({ "article": { "title": "Draft", "content": "v1" } }),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        json_request("PUT", "/api/articles/draft", json!({ "content": "v2" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["slug"], "draft");

    let (_, _, article) = send(&app, get("/api/articles/draft")).await;
    assert_eq!(article["content"], "v2");
}

#[tokio::test]
async fn unknown_slug_lists_available_ones() {
    let (_, app) = app();
    send(
        &app,
        json_request(
            "POST",
            "/api/articles",
            json!({ "article": { "title": "Real Post", "content": "x" } }),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        json_request("DELETE", "/api/articles", json!({ "slug": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["requestedSlug"], "missing");
    assert_eq!(body["availableSlugs"], json!(["real-post"]));

    let (status, _, body) = send(&app, get("/api/articles/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["availableSlugs"], json!(["real-post"]));
}

#[tokio::test]
async fn delete_removes_article() {
    let (store, app) = app();
    send(
        &app,
        json_request(
            "POST",
            "/api/articles",
            json!({ "article": { "title": "Short Lived", "content": "x" } }),
        ),
    )
    .await;

    let (status, _, _) = send(
        &app,
        json_request("DELETE", "/api/articles", json!({ "slug": "short-lived" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(store.get_content("data/md/short-lived.md").await.is_err());
    let (_, _, list) = send(&app, get("/api/articles")).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn resync_orders_newest_first() {
    let (store, app) = app();
    for (name, date) in [("jan", "2024-01-01"), ("mar", "2024-03-01"), ("feb", "2024-02-01")] {
        store.force_put(
            &format!("data/md/{name}.md"),
            format!("---\ntitle: {name}\ndate: {date}\n---\n{name} body\n").into_bytes(),
        );
    }

    let (status, _, body) = send(&app, json_request("POST", "/api/articles/sync", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);

    let (_, _, list) = send(&app, get("/api/articles")).await;
    let titles: Vec<_> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["title"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["mar", "feb", "jan"]);
}

#[tokio::test]
async fn strict_create_rejects_duplicates_and_bad_slugs() {
    let (_, app) = app();
    let article = json!({ "title": "Once", "description": "", "content": "c", "slug": "once" });

    let (status, _, body) = send(&app, json_request("POST", "/api/articles/create", article.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Article created successfully", "slug": "once" }));

    let (status, _, body) = send(&app, json_request("POST", "/api/articles/create", article)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Article with this slug already exists");

    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/api/articles/create",
            json!({ "title": "Bad", "content": "", "slug": "Bad_Slug" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid slug format");
}

#[tokio::test]
async fn category_rename_cascades_into_index() {
    let (_, app) = app();
    seed_categories(&app).await;
    send(
        &app,
        json_request(
            "POST",
            "/api/articles",
            json!({ "article": { "title": "Tagged", "content": "x", "category": "ai" } }),
        ),
    )
    .await;

    send(
        &app,
        json_request(
            "POST",
            "/api/categories",
            json!({ "categories": [{ "slug": "ai", "name": "Machine Learning" }] }),
        ),
    )
    .await;

    let (_, _, categories) = send(&app, get("/api/categories")).await;
    assert_eq!(categories, json!([{ "slug": "ai", "name": "Machine Learning" }]));
    let (_, _, list) = send(&app, get("/api/articles")).await;
    assert_eq!(list[0]["categoryName"], "Machine Learning");
}

#[tokio::test]
async fn resource_lifecycle() {
    let (store, app) = app();
    let (status, _, body) = send(
        &app,
        json_request(
            "POST",
            "/api/resources",
            json!({ "name": "Docs", "description": "API docs", "url": "https://docs.rs" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let id = body["resource"]["id"].as_str().unwrap().to_string();

    let (_, _, list) = send(&app, get("/api/resources?source=github")).await;
    assert_eq!(list[0]["name"], "Docs");

    let before = store.get_content("data/json/resources.json").await.unwrap();
    let (status, _, body) = send(&app, json_request("DELETE", "/api/resources/nope", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["requestedId"], "nope");
    assert_eq!(body["availableIds"], json!([id.clone()]));
    assert_eq!(store.get_content("data/json/resources.json").await.unwrap(), before);

    let uri = format!("/api/resources/{id}");
    let (status, _, _) = send(&app, json_request("DELETE", &uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, list) = send(&app, get("/api/resources?source=github")).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn resource_array_replaces_whole_list() {
    let (_, app) = app();
    let replacement = json!([
        { "id": "1", "name": "A", "description": "", "url": "https://a", "createdAt": "2024-01-01T00:00:00.000Z" },
        { "id": "2", "name": "B", "description": "", "url": "https://b", "createdAt": "2024-01-02T00:00:00.000Z" }
    ]);
    let (status, _, body) = send(&app, json_request("POST", "/api/resources", replacement.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, replacement);
}

#[tokio::test]
async fn upload_returns_raw_url() {
    let (store, app) = app();
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"pic.png\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n--{boundary}--\r\n"
    );
    let request = Request::post("/api/github/upload")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("memory://main/uploads/images/"));
    assert!(url.ends_with(".png"));
    let path = url.trim_start_matches("memory://main/");
    assert_eq!(store.get_content(path).await.unwrap().bytes, b"PNGDATA".to_vec());
}

#[tokio::test]
async fn upload_rejects_non_images() {
    let (_, app) = app();
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{boundary}--\r\n"
    );
    let request = Request::post("/api/github/upload")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_and_check_auth() {
    let (_, app) = app();
    let (status, _, body) = send(
        &app,
        json_request("POST", "/api/login", json!({ "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid password");

    let (_, _, body) = send(&app, get("/api/check-auth")).await;
    assert_eq!(body, json!({ "isLoggedIn": false }));

    let cookie = session_cookie(&app).await;
    let request = Request::get("/api/check-auth")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, request).await;
    assert_eq!(body, json!({ "isLoggedIn": true }));
}

#[tokio::test]
async fn logout_clears_session_cookie() {
    let (_, app) = app();
    let (status, headers, body) = send(&app, json_request("POST", "/api/logout", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let cleared = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.starts_with("auth_token=;"));
    for attribute in ["HttpOnly", "SameSite=Lax", "Path=/", "Max-Age=0", "Secure"] {
        assert!(cleared.contains(attribute), "{cleared} lacks {attribute}");
    }

    let request = Request::get("/api/check-auth")
        .header(COOKIE, cleared.split(';').next().unwrap())
        .body(Body::empty())
        .unwrap();
    let (_, _, body) = send(&app, request).await;
    assert_eq!(body, json!({ "isLoggedIn": false }));
}

#[tokio::test]
async fn malformed_bodies_are_json_validation_errors() {
    let (store, app) = app();
    let cases = [
        ("POST", "/api/articles"),
        ("DELETE", "/api/articles"),
        ("POST", "/api/articles/create"),
        ("POST", "/api/categories"),
        ("POST", "/api/login"),
    ];
    for (method, uri) in cases {
        let (status, _, body) = send(&app, json_request(method, uri, json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
        let error = body["error"].as_str().unwrap_or_default();
        assert!(error.starts_with("Invalid request"), "{method} {uri}: {body}");
    }

    let request = Request::post("/api/articles")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let request = Request::post("/api/login")
        .body(Body::from(r#"{"password":"open-sesame"}"#))
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(SET_COOKIE).is_none());
    assert!(store.paths().is_empty());
}

#[tokio::test]
async fn admin_and_login_pages_redirect_by_session() {
    let (_, app) = app();
    let (status, headers, _) = send(&app, get("/admin/articles")).await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(headers.get(LOCATION).unwrap(), "/login");

    let (status, _, _) = send(&app, get("/login")).await;
    assert_ne!(status, StatusCode::TEMPORARY_REDIRECT);

    let cookie = session_cookie(&app).await;
    let request = Request::get("/login")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(headers.get(LOCATION).unwrap(), "/admin");

    let request = Request::get("/admin")
        .header(COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_ne!(status, StatusCode::TEMPORARY_REDIRECT);
}
