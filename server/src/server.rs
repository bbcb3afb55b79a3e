use crate::handlers;
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

pub const ADMIN_PATH: &str = "/admin";
pub const LOGIN_PATH: &str = "/login";

fn is_admin_path(path: &str) -> bool {
    path == ADMIN_PATH
        || path
            .strip_prefix(ADMIN_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Sends visitors without a session from the admin pages to the login page,
/// and signed-in visitors from the login page to the admin pages.
async fn session_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if is_admin_path(path) && !state.auth.check(request.headers()) {
        return Redirect::temporary(LOGIN_PATH).into_response();
    }
    if path == LOGIN_PATH && state.auth.check(request.headers()) {
        return Redirect::temporary(ADMIN_PATH).into_response();
    }
    next.run(request).await
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/articles",
            get(handlers::list_articles)
                .post(handlers::save_article)
                .delete(handlers::delete_article),
        )
        .route("/articles/sync", post(handlers::sync_articles))
        .route("/articles/create", post(handlers::create_article))
        .route("/articles/repair", post(handlers::repair_articles))
        .route(
            "/articles/:slug",
            get(handlers::get_article).put(handlers::update_article),
        )
        .route(
            "/categories",
            get(handlers::list_categories).post(handlers::replace_categories),
        )
        .route(
            "/resources",
            get(handlers::list_resources).post(handlers::save_resources),
        )
        .route("/resources/:id", delete(handlers::delete_resource))
        .route("/github/upload", post(handlers::upload_image))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/check-auth", get(handlers::check_auth));

    let mut app = Router::new().nest("/api", api);
    if let Some(dir) = &state.config.static_dir {
        let index = ServeFile::new(dir.join("index.html"));
        app = app.fallback_service(ServeDir::new(dir).not_found_service(index));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), session_gate))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "cms server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
