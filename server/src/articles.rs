//! Article files and the denormalized index that lists them.
//!
//! Each article lives in `data/md/{slug}.md` as front matter plus Markdown.
//! `data/json/articles.json` repeats every file's metadata so listings need a
//! single read. Writes touch the file first and the index second; the two are
//! not updated atomically, and a full [`ArticleService::sync`] rebuilds the
//! index from the files.

use crate::categories::CategoryService;
use crate::error::CmsError;
use crate::front_matter::{self, FrontMatter};
use crate::models::{sort_by_date_desc, Article, ArticleInput, ArticleSummary, Category};
use crate::slug::{generate_slug, validate_slug};
use crate::store::{self, ContentStore, EntryKind, RetryPolicy, StoreError, StoredFile};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CONTENT_ROOT: &str = "data/md";
pub const INDEX_PATH: &str = "data/json/articles.json";

/// Segments routed to index operations under `/api/articles/`, never article slugs.
pub const RESERVED_SLUGS: &[&str] = &["create", "repair", "sync"];

fn check_reserved(slug: &str) -> Result<(), CmsError> {
    if RESERVED_SLUGS.contains(&slug) {
        Err(CmsError::Validation(format!("Slug {slug:?} is reserved")))
    } else {
        Ok(())
    }
}

pub fn path_for_slug(slug: &str) -> String {
    format!("{CONTENT_ROOT}/{slug}.md")
}

/// Index entries written before slugs were stored fall back to the title.
pub fn effective_slug(entry: &ArticleSummary) -> String {
    if entry.slug.is_empty() {
        generate_slug(&entry.title)
    } else {
        entry.slug.clone()
    }
}

pub fn category_name(categories: &[Category], slug: &str) -> String {
    categories
        .iter()
        .find(|c| c.slug == slug)
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

/// Sets every entry's display name from `categories`, empty when the slug is
/// unknown. Returns the number of entries that changed.
pub fn apply_category_names(articles: &mut [ArticleSummary], categories: &[Category]) -> usize {
    let mut changed = 0;
    for article in articles.iter_mut() {
        let name = category_name(categories, &article.category);
        if article.category_name != name {
            article.category_name = name;
            changed += 1;
        }
    }
    changed
}

fn now_timestamp() -> String {
    timestamp(Utc::now())
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn check_article_path(path: &str) -> Result<(), CmsError> {
    let inside_root = path
        .strip_prefix(CONTENT_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty() && rest.split('/').all(|seg| !seg.is_empty() && seg != ".." && seg != "."));
    if inside_root && path.ends_with(".md") {
        Ok(())
    } else {
        Err(CmsError::Validation(format!(
            "article path must be a .md file under {CONTENT_ROOT}/"
        )))
    }
}

fn front_matter_of(summary: &ArticleSummary) -> FrontMatter {
    FrontMatter {
        title: summary.title.clone(),
        description: summary.description.clone(),
        date: summary.date.clone(),
        category: summary.category.clone(),
        category_name: summary.category_name.clone(),
        slug: summary.slug.clone(),
        last_modified: summary.last_modified.clone(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn or_keep(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Index entry overlaid with the file's own front matter and body.
fn merge(entry: ArticleSummary, file: &StoredFile) -> Article {
    let doc = front_matter::parse(&String::from_utf8_lossy(&file.bytes));
    let meta = doc.metadata;
    Article {
        summary: ArticleSummary {
            title: or_keep(&meta.title, &entry.title),
            description: or_keep(&meta.description, &entry.description),
            date: or_keep(&meta.date, &entry.date),
            category: or_keep(&meta.category, &entry.category),
            category_name: or_keep(&meta.category_name, &entry.category_name),
            last_modified: or_keep(&meta.last_modified, &entry.last_modified),
            path: entry.path,
            slug: entry.slug,
        },
        content: doc.body,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKey {
    Slug,
    Path,
}

/// Body of the strict create endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub repaired: usize,
    pub rewritten: usize,
}

#[derive(Clone)]
pub struct ArticleService {
    store: Arc<dyn ContentStore>,
    categories: CategoryService,
    retry: RetryPolicy,
}

impl ArticleService {
    pub fn new(store: Arc<dyn ContentStore>, categories: CategoryService, retry: RetryPolicy) -> Self {
        ArticleService {
            store,
            categories,
            retry,
        }
    }

    fn store(&self) -> &dyn ContentStore {
        self.store.as_ref()
    }

    async fn load_index(&self) -> Result<Vec<ArticleSummary>, CmsError> {
        Ok(store::read_json(self.store(), INDEX_PATH)
            .await?
            .map(|doc| doc.value)
            .unwrap_or_default())
    }

    /// The index as stored, with slugs filled in for entries that lack one.
    pub async fn list(&self) -> Result<Vec<ArticleSummary>, CmsError> {
        let mut index = self.load_index().await?;
        for entry in index.iter_mut() {
            entry.slug = effective_slug(entry);
        }
        Ok(index)
    }

    async fn read_file(&self, path: &str) -> Result<StoredFile, CmsError> {
        match self.store().get_content(path).await {
            Ok(file) => Ok(file),
            Err(StoreError::NotFound(_)) => {
                Err(CmsError::NotFound("Article content not found".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Article, CmsError> {
        let index = self.list().await?;
        let Some(entry) = index.iter().find(|a| a.slug == slug).cloned() else {
            return Err(CmsError::ArticleNotFound {
                slug: slug.to_string(),
                available_slugs: index.into_iter().map(|a| a.slug).filter(|s| !s.is_empty()).collect(),
            });
        };
        debug!(slug, path = %entry.path, "reading article");
        let file = self.read_file(&entry.path).await?;
        Ok(merge(entry, &file))
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Article, CmsError> {
        check_article_path(path)?;
        let file = self.read_file(path).await?;
        let entry = self
            .list()
            .await?
            .into_iter()
            .find(|a| a.path == path)
            .unwrap_or_else(|| ArticleSummary {
                path: path.to_string(),
                ..Default::default()
            });

        let mut article = merge(entry, &file);
        if article.summary.slug.is_empty() {
            let meta = front_matter::parse(&String::from_utf8_lossy(&file.bytes)).metadata;
            let stem = path.rsplit('/').next().unwrap_or(path).trim_end_matches(".md");
            article.summary.slug = or_keep(&meta.slug, &generate_slug(stem));
        }
        Ok(article)
    }

    /// Writes the article file, taking the current version token when one exists.
    async fn write_file(&self, summary: &ArticleSummary, body: &str, message: &str) -> Result<(), CmsError> {
        let version = store::current_version(self.store(), &summary.path).await?;
        let document = front_matter::serialize(body, &front_matter_of(summary));
        self.store()
            .put_content(&summary.path, document.into_bytes(), message, version.as_deref())
            .await?;
        Ok(())
    }

    /// Replaces the entry matching `summary` by `key`, or puts it first.
    pub async fn upsert_index(&self, summary: ArticleSummary, key: MatchKey) -> Result<(), CmsError> {
        let message = format!("Update articles index for: {}", summary.title);
        store::modify_json::<Vec<ArticleSummary>, _, CmsError, _>(
            self.store(),
            INDEX_PATH,
            &message,
            &self.retry,
            |articles| {
                let found = articles.iter().position(|a| match key {
                    MatchKey::Slug => effective_slug(a) == summary.slug,
                    MatchKey::Path => a.path == summary.path,
                });
                match found {
                    Some(i) => articles[i] = summary.clone(),
                    None => articles.insert(0, summary.clone()),
                }
                Ok(())
            },
        )
        .await
    }

    async fn record(&self, summary: &ArticleSummary, body: &str, key: MatchKey) -> Result<(), CmsError> {
        let message = format!("Create/Update article: {}", summary.title);
        self.write_file(summary, body, &message).await?;
        if let Err(e) = self.upsert_index(summary.clone(), key).await {
            warn!(path = %summary.path, error = %e, "article written but index not updated, resync to repair");
            return Err(e);
        }
        info!(slug = %summary.slug, path = %summary.path, "article saved");
        Ok(())
    }

    async fn resolve_category(&self, category: &str, supplied_name: Option<String>) -> Result<String, CmsError> {
        if category.is_empty() {
            return Ok(String::new());
        }
        let name = category_name(&self.categories.list().await?, category);
        Ok(if name.is_empty() {
            supplied_name.unwrap_or_default()
        } else {
            name
        })
    }

    /// Creates or overwrites an article and upserts its index entry by slug.
    pub async fn save(&self, input: ArticleInput) -> Result<ArticleSummary, CmsError> {
        let title = non_empty(input.title)
            .ok_or_else(|| CmsError::Validation("title is required".to_string()))?;
        let slug = non_empty(input.slug).unwrap_or_else(|| generate_slug(&title));
        if !validate_slug(&slug) {
            return Err(CmsError::Validation(format!("Invalid slug format: {slug:?}")));
        }
        check_reserved(&slug)?;
        let path = match non_empty(input.path) {
            Some(path) => {
                check_article_path(&path)?;
                path
            }
            None => path_for_slug(&slug),
        };
        let category = input.category.unwrap_or_default();
        let category_name = self.resolve_category(&category, input.category_name).await?;

        let summary = ArticleSummary {
            title,
            description: input.description.unwrap_or_default(),
            date: non_empty(input.date).unwrap_or_else(|| Utc::now().date_naive().to_string()),
            category,
            category_name,
            path,
            slug,
            last_modified: now_timestamp(),
        };
        self.record(&summary, &input.content.unwrap_or_default(), MatchKey::Slug)
            .await?;
        Ok(summary)
    }

    /// Applies `input` on top of the stored article `slug`; absent fields keep
    /// their stored value. The index entry is replaced by path.
    pub async fn update(&self, slug: &str, input: ArticleInput) -> Result<ArticleSummary, CmsError> {
        let index = self.list().await?;
        let entry = index.iter().find(|a| a.slug == slug).cloned();
        let path = entry
            .as_ref()
            .map(|e| e.path.clone())
            .unwrap_or_else(|| path_for_slug(slug));

        let file = match self.store().get_content(&path).await {
            Ok(file) => file,
            Err(StoreError::NotFound(_)) => {
                return Err(CmsError::ArticleNotFound {
                    slug: slug.to_string(),
                    available_slugs: index.into_iter().map(|a| a.slug).collect(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let current = merge(
            entry.unwrap_or_else(|| ArticleSummary {
                path: path.clone(),
                slug: slug.to_string(),
                ..Default::default()
            }),
            &file,
        );
        let old = current.summary;

        let category = input.category.unwrap_or(old.category);
        let category_name = self
            .resolve_category(&category, input.category_name.or(Some(old.category_name)))
            .await?;
        let summary = ArticleSummary {
            title: non_empty(input.title).unwrap_or(old.title),
            description: input.description.unwrap_or(old.description),
            date: non_empty(input.date).unwrap_or(old.date),
            category,
            category_name,
            path,
            slug: slug.to_string(),
            last_modified: now_timestamp(),
        };
        let body = input.content.unwrap_or(current.content);

        let message = format!("Update article: {}", summary.title);
        let document = front_matter::serialize(&body, &front_matter_of(&summary));
        self.store()
            .put_content(&summary.path, document.into_bytes(), &message, Some(&file.version))
            .await?;
        if let Err(e) = self.upsert_index(summary.clone(), MatchKey::Path).await {
            warn!(path = %summary.path, error = %e, "article updated but index not updated, resync to repair");
            return Err(e);
        }
        info!(slug, "article updated");
        Ok(summary)
    }

    /// Creates `data/md/{slug}.md` only if it does not exist yet, then resyncs.
    pub async fn create_new(&self, article: NewArticle) -> Result<String, CmsError> {
        if !validate_slug(&article.slug) {
            return Err(CmsError::Validation("Invalid slug format".to_string()));
        }
        check_reserved(&article.slug)?;
        let path = path_for_slug(&article.slug);
        if store::current_version(self.store(), &path).await?.is_some() {
            return Err(CmsError::Validation(
                "Article with this slug already exists".to_string(),
            ));
        }

        let now = now_timestamp();
        let metadata = FrontMatter {
            title: article.title.clone(),
            description: article.description,
            date: now.clone(),
            slug: article.slug.clone(),
            last_modified: now,
            ..Default::default()
        };
        let document = front_matter::serialize(&article.content, &metadata);
        self.store()
            .put_content(
                &path,
                document.into_bytes(),
                &format!("Create new article: {}", article.title),
                None,
            )
            .await?;
        self.sync().await?;
        Ok(article.slug)
    }

    /// Removes the article file and its index entry.
    pub async fn delete(&self, slug: &str) -> Result<(), CmsError> {
        let index = self.list().await?;
        let Some(entry) = index.iter().find(|a| a.slug == slug).cloned() else {
            return Err(CmsError::ArticleNotFound {
                slug: slug.to_string(),
                available_slugs: index.into_iter().map(|a| a.slug).collect(),
            });
        };

        let message = format!("Delete article: {}", entry.title);
        match self.store().get_content(&entry.path).await {
            Ok(file) => {
                self.store()
                    .delete_content(&entry.path, &file.version, &message)
                    .await?
            }
            Err(StoreError::NotFound(_)) => {
                warn!(slug, path = %entry.path, "article file already gone, dropping index entry");
            }
            Err(e) => return Err(e.into()),
        }

        store::modify_json::<Vec<ArticleSummary>, _, CmsError, _>(
            self.store(),
            INDEX_PATH,
            &format!("Remove article from index: {}", entry.title),
            &self.retry,
            |articles| {
                articles.retain(|a| effective_slug(a) != slug);
                Ok(())
            },
        )
        .await?;
        info!(slug, "article deleted");
        Ok(())
    }

    /// Rebuilds the whole index from the Markdown files, newest first.
    pub async fn sync(&self) -> Result<Vec<ArticleSummary>, CmsError> {
        let categories = self.categories.list().await?;
        let entries = match self.store().list_directory(CONTENT_ROOT).await {
            Ok(entries) => entries,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut articles = Vec::new();
        for entry in entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.name.ends_with(".md"))
        {
            let file = match self.store().get_content(&entry.path).await {
                Ok(file) => file,
                Err(StoreError::NotFound(_)) => {
                    warn!(path = %entry.path, "listed file vanished, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let meta = front_matter::parse(&String::from_utf8_lossy(&file.bytes)).metadata;

            let last_modified = match self.store().last_revision_at(&entry.path).await {
                Ok(Some(at)) => timestamp(at),
                Ok(None) => file.version.clone(),
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "no revision time, using version token");
                    file.version.clone()
                }
            };

            let stem = entry.name.trim_end_matches(".md");
            let slug = [meta.slug.clone(), generate_slug(&meta.title), generate_slug(stem)]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_default();

            articles.push(ArticleSummary {
                category_name: category_name(&categories, &meta.category),
                title: meta.title,
                description: meta.description,
                date: meta.date,
                category: meta.category,
                path: entry.path.clone(),
                slug,
                last_modified,
            });
        }
        sort_by_date_desc(&mut articles);

        store::modify_json::<Vec<ArticleSummary>, _, CmsError, _>(
            self.store(),
            INDEX_PATH,
            "Sync articles",
            &self.retry,
            |index| {
                *index = articles.clone();
                Ok(())
            },
        )
        .await?;
        info!(count = articles.len(), "articles index rebuilt");
        Ok(articles)
    }

    /// Backfills index slugs and titles from the files and rewrites files
    /// whose front matter does not match their index entry.
    pub async fn repair(&self) -> Result<RepairReport, CmsError> {
        let index = self.load_index().await?;
        let mut report = RepairReport::default();
        let mut fixed: HashMap<String, (String, String)> = HashMap::new();

        for entry in &index {
            let file = match self.store().get_content(&entry.path).await {
                Ok(file) => file,
                Err(StoreError::NotFound(_)) => {
                    warn!(path = %entry.path, "index entry has no file, left as is");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let text = String::from_utf8_lossy(&file.bytes).into_owned();
            let doc = front_matter::parse(&text);

            let title = or_keep(&doc.metadata.title, &entry.title);
            let slug = [doc.metadata.slug.clone(), entry.slug.clone(), generate_slug(&title)]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or_default();
            if title != entry.title || slug != entry.slug {
                report.repaired += 1;
                fixed.insert(entry.path.clone(), (title.clone(), slug.clone()));
            }

            let repaired = ArticleSummary {
                title,
                slug,
                date: or_keep(&entry.date, &Utc::now().date_naive().to_string()),
                last_modified: or_keep(&entry.last_modified, &now_timestamp()),
                ..entry.clone()
            };
            let document = front_matter::serialize(&doc.body, &front_matter_of(&repaired));
            if document != text {
                self.store()
                    .put_content(
                        &entry.path,
                        document.into_bytes(),
                        &format!("Repair front matter: {}", repaired.title),
                        Some(&file.version),
                    )
                    .await?;
                report.rewritten += 1;
            }
        }

        if !fixed.is_empty() {
            store::modify_json::<Vec<ArticleSummary>, _, CmsError, _>(
                self.store(),
                INDEX_PATH,
                "Repair articles index",
                &self.retry,
                |articles| {
                    for article in articles.iter_mut() {
                        if let Some((title, slug)) = fixed.get(&article.path) {
                            article.title = title.clone();
                            article.slug = slug.clone();
                        }
                    }
                    Ok(())
                },
            )
            .await?;
        }
        info!(repaired = report.repaired, rewritten = report.rewritten, "articles repaired");
        Ok(report)
    }
}
