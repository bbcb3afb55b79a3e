use crate::articles::{apply_category_names, INDEX_PATH};
use crate::error::CmsError;
use crate::models::{ArticleSummary, Category};
use crate::slug::validate_slug;
use crate::store::{self, ContentStore, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CATEGORIES_PATH: &str = "data/json/categories.json";

#[derive(Clone)]
pub struct CategoryService {
    store: Arc<dyn ContentStore>,
    retry: RetryPolicy,
}

impl CategoryService {
    pub fn new(store: Arc<dyn ContentStore>, retry: RetryPolicy) -> Self {
        CategoryService { store, retry }
    }

    /// An absent category document is an empty list.
    pub async fn list(&self) -> Result<Vec<Category>, CmsError> {
        Ok(store::read_json(self.store.as_ref(), CATEGORIES_PATH)
            .await?
            .map(|doc| doc.value)
            .unwrap_or_default())
    }

    /// Overwrites the whole category document. Slug uniqueness is the caller's concern.
    pub async fn replace_all(&self, categories: Vec<Category>) -> Result<(), CmsError> {
        if let Some(bad) = categories.iter().find(|c| !validate_slug(&c.slug)) {
            return Err(CmsError::Validation(format!(
                "Invalid category slug {:?}",
                bad.slug
            )));
        }

        store::modify_json::<Vec<Category>, _, CmsError, _>(
            self.store.as_ref(),
            CATEGORIES_PATH,
            "Update categories",
            &self.retry,
            |current| {
                *current = categories.clone();
                Ok(())
            },
        )
        .await?;
        info!(count = categories.len(), "categories replaced");
        Ok(())
    }

    /// Re-resolves every index entry's display name against `categories`.
    /// Returns how many entries changed; a missing index is left missing.
    pub async fn cascade_rename(&self, categories: &[Category]) -> Result<usize, CmsError> {
        if store::current_version(self.store.as_ref(), INDEX_PATH)
            .await?
            .is_none()
        {
            debug!("no articles index, nothing to cascade");
            return Ok(0);
        }
        let changed = store::modify_json::<Vec<ArticleSummary>, _, CmsError, _>(
            self.store.as_ref(),
            INDEX_PATH,
            "Update category names in articles index",
            &self.retry,
            |articles| Ok(apply_category_names(articles, categories)),
        )
        .await?;
        info!(changed, "category names cascaded into index");
        Ok(changed)
    }

    /// Replaces the list, then cascades names into the index.
    ///
    /// The update counts as done once the category document is written; a
    /// failed cascade is logged and left for the next resync.
    pub async fn update(&self, categories: Vec<Category>) -> Result<(), CmsError> {
        self.replace_all(categories.clone()).await?;
        if let Err(e) = self.cascade_rename(&categories).await {
            warn!(error = %e, "category names not propagated to articles index");
        }
        Ok(())
    }
}
