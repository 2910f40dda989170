//! HTTP engine: feed and search-API collectors, article page fetch, link probing.

use crate::consts::{headers, limits, selectors};
use crate::model::Article;
use crate::utils::{clean_text, truncate_text};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{header, Client, StatusCode};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP: {0}")] Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")] Status(StatusCode),
    #[error("Feed: {0}")] Feed(String),
    #[error("No Key")] NoKey,
    #[error("Empty")] Empty,
}

/// A source of candidate articles. Implementations report their own failure;
/// the caller decides that a failed source simply contributes nothing.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> String;
    async fn collect(&self) -> Result<Vec<Article>, FetchError>;
}

/// Anything able to tell whether a link is still reachable
#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn is_alive(&self, url: &str) -> bool;
}

pub struct NewsEngine {
    client: Client,
    link_timeout: Duration,
    body_selector: Selector,
}

impl NewsEngine {
    pub fn new(request_timeout: Duration, link_timeout: Duration) -> Result<Arc<Self>, FetchError> {
        let client = Client::builder()
            .user_agent(headers::USER_AGENT)
            .timeout(request_timeout)
            .build()?;

        Ok(Arc::new(Self {
            client,
            link_timeout,
            body_selector: Selector::parse(selectors::ARTICLE_TEXT)
                .map_err(|e| FetchError::Feed(format!("selector: {e:?}")))?,
        }))
    }

    pub async fn fetch_rss(&self, url: &str) -> Result<Vec<Article>, FetchError> {
        let res = self
            .client
            .get(url)
            .header(header::ACCEPT, headers::ACCEPT_RSS)
            .header(header::ACCEPT_LANGUAGE, headers::ACCEPT_LANG)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status()));
        }
        let bytes = res.bytes().await?;
        parse_feed(&bytes)
    }

    pub async fn fetch_news_api(&self, query: &NewsQuery<'_>) -> Result<Vec<Article>, FetchError> {
        let api_key = query.api_key.ok_or(FetchError::NoKey)?;
        let from = (query.now - ChronoDuration::days(query.max_days)).format("%Y-%m-%dT%H:%M:%S").to_string();
        let page_size = query.page_size.to_string();
        let domains = query.domains.join(",");

        let mut params = vec![
            ("q", query.topic),
            ("language", "ru"),
            ("from", from.as_str()),
            ("pageSize", page_size.as_str()),
            ("sortBy", "publishedAt"),
            ("apiKey", api_key),
        ];
        if !domains.is_empty() {
            params.push(("domains", domains.as_str()));
        }

        let res = self.client.get(query.endpoint).query(&params).send().await?;
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status()));
        }
        let data: NewsApiResponse = res.json().await?;

        Ok(data
            .articles
            .into_iter()
            .filter_map(|a| {
                let url = a.url?;
                let title = clean_text(&a.title?);
                if title.is_empty() || title == "[Removed]" {
                    return None;
                }
                let published = a
                    .published_at
                    .and_then(|p| DateTime::parse_from_rfc3339(&p).ok())
                    .map(|d| d.with_timezone(&Utc));
                Some(Article::new(title, &url, published).with_summary(a.description.map(|d| clean_text(&d))))
            })
            .collect())
    }

    /// Plain text of an article page, for the body filter
    pub async fn fetch_page_text(&self, url: &str) -> Result<String, FetchError> {
        let res = self
            .client
            .get(url)
            .header(header::ACCEPT, headers::ACCEPT_HTML)
            .header(header::ACCEPT_LANGUAGE, headers::ACCEPT_LANG)
            .send()
            .await?;
        if res.status() != StatusCode::OK {
            return Err(FetchError::Status(res.status()));
        }
        let html = res.text().await?;
        let text = self.extract_text(&html);
        if text.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(text)
    }

    fn extract_text(&self, html: &str) -> String {
        let document = Html::parse_document(html);
        let mut text = String::new();
        for el in document.select(&self.body_selector) {
            let chunk = clean_text(&el.text().collect::<String>());
            if chunk.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(&chunk);
            if text.len() >= limits::MAX_BODY_CHARS {
                break;
            }
        }
        text
    }
}

#[async_trait]
impl LinkProbe for NewsEngine {
    /// HEAD with a short timeout; any error or status >= 400 counts as dead.
    async fn is_alive(&self, url: &str) -> bool {
        match self.client.head(url).timeout(self.link_timeout).send().await {
            Ok(res) => res.status().as_u16() < 400,
            Err(e) => {
                log::debug!("Link probe failed for {}: {}", url, e);
                false
            }
        }
    }
}

/// Feed bytes to articles. Entries without a link are dropped; missing dates stay `None`
/// and are judged by the filter.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Article>, FetchError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FetchError::Feed(e.to_string()))?;

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|e| {
            let link = e.links.first().map(|l| l.href.clone())?;
            let title = clean_text(&e.title.map(|t| t.content).unwrap_or_default());
            if title.is_empty() {
                return None;
            }
            let published = e.published.or(e.updated).map(|d| d.with_timezone(&Utc));
            let summary = e
                .summary
                .map(|s| clean_text(&s.content))
                .or_else(|| e.content.and_then(|c| c.body).map(|b| clean_text(&b)))
                .map(|s| truncate_text(&s, limits::MAX_SUMMARY_CHARS * 2));
            Some(Article::new(truncate_text(&title, limits::MAX_TITLE_CHARS), &link, published).with_summary(summary))
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
    published_at: Option<String>,
}

/// Parameters of one search-API request
#[derive(Debug, Clone)]
pub struct NewsQuery<'a> {
    pub endpoint: &'a str,
    pub api_key: Option<&'a str>,
    pub topic: &'a str,
    pub max_days: i64,
    pub page_size: usize,
    pub domains: &'a [String],
    pub now: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════
// COLLECTORS
// ═══════════════════════════════════════════════════════════════════

pub struct RssCollector {
    engine: Arc<NewsEngine>,
    url: String,
}

impl RssCollector {
    pub fn new(engine: Arc<NewsEngine>, url: impl Into<String>) -> Self {
        Self { engine, url: url.into() }
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn name(&self) -> String {
        format!("rss {}", self.url)
    }

    async fn collect(&self) -> Result<Vec<Article>, FetchError> {
        self.engine.fetch_rss(&self.url).await
    }
}

pub struct NewsApiCollector {
    engine: Arc<NewsEngine>,
    endpoint: String,
    api_key: String,
    topic: String,
    max_days: i64,
    page_size: usize,
    domains: Vec<String>,
}

impl NewsApiCollector {
    pub fn new(
        engine: Arc<NewsEngine>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        topic: impl Into<String>,
        max_days: i64,
        page_size: usize,
        domains: Vec<String>,
    ) -> Self {
        Self {
            engine,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            topic: topic.into(),
            max_days,
            page_size,
            domains,
        }
    }
}

#[async_trait]
impl Collector for NewsApiCollector {
    fn name(&self) -> String {
        format!("news-api {:?}", self.topic)
    }

    async fn collect(&self) -> Result<Vec<Article>, FetchError> {
        let query = NewsQuery {
            endpoint: &self.endpoint,
            api_key: Some(&self.api_key),
            topic: &self.topic,
            max_days: self.max_days,
            page_size: self.page_size,
            domains: &self.domains,
            now: Utc::now(),
        };
        self.engine.fetch_news_api(&query).await
    }
}
