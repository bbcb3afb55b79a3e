pub mod articles;
pub mod auth;
pub mod categories;
pub mod config;
pub mod error;
pub mod front_matter;
pub mod handlers;
pub mod models;
pub mod resources;
pub mod server;
pub mod slug;
pub mod state;
pub mod store;
pub mod uploads;

use config::{Config, StoreBackend};
use std::sync::Arc;
use store::{ContentStore, GitHubStore, InMemoryStore, StoreError};
use tracing::{info, warn};

pub fn build_store(config: &Config) -> Result<Arc<dyn ContentStore>, StoreError> {
    let branch = config.active_branch();
    Ok(match config.backend {
        StoreBackend::GitHub => Arc::new(GitHubStore::new(&config.github, branch)?),
        StoreBackend::Memory => {
            warn!("using the in-memory store, nothing will be persisted");
            Arc::new(InMemoryStore::new(branch))
        }
    })
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(?config, "starting");
    let store = build_store(&config)?;
    let addr = config.bind_addr;
    let state = state::AppState::new(config, store)?;
    server::start_server(state, addr).await?;
    Ok(())
}
