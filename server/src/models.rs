use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};

/// One entry of `data/json/articles.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticleSummary {
    pub title: String,
    pub description: String,
    pub date: String,
    pub category: String,
    pub category_name: String,
    pub path: String,
    pub slug: String,
    pub last_modified: String,
}

impl ArticleSummary {
    /// Calendar day used for ordering; accepts plain dates and RFC 3339 timestamps.
    pub fn sort_date(&self) -> Option<NaiveDate> {
        let raw = self.date.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive()))
    }
}

/// Newest first; entries without a readable date go last, otherwise stable.
pub fn sort_by_date_desc(articles: &mut [ArticleSummary]) {
    articles.sort_by(|a, b| match (a.sort_date(), b.sort_date()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(flatten)]
    pub summary: ArticleSummary,
    pub content: String,
}

/// Client-supplied article fields; anything absent is derived or kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
    pub category_name: Option<String>,
    pub slug: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
}
