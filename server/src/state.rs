use crate::articles::ArticleService;
use crate::auth::AuthGate;
use crate::categories::CategoryService;
use crate::config::{Config, ConfigError};
use crate::resources::ResourceService;
use crate::store::ContentStore;
use crate::uploads::UploadService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ContentStore>,
    pub articles: ArticleService,
    pub categories: CategoryService,
    pub resources: ResourceService,
    pub uploads: UploadService,
    pub auth: Arc<AuthGate>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ContentStore>) -> Result<Self, ConfigError> {
        let auth = AuthGate::new(
            &config.access_password,
            &config.session_secret,
            config.is_production(),
        )?;
        let categories = CategoryService::new(store.clone(), config.retry.clone());
        let articles = ArticleService::new(store.clone(), categories.clone(), config.retry.clone());
        let resources =
            ResourceService::new(store.clone(), config.data_dir.clone(), config.retry.clone());

        Ok(AppState {
            uploads: UploadService::new(store.clone()),
            articles,
            categories,
            resources,
            auth: Arc::new(auth),
            store,
            config: Arc::new(config),
        })
    }
}
