//! Core data: discovered articles, their category and the URL identity key.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Tracking parameters dropped during canonicalization (besides any `utm_*`)
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "yclid", "ysclid"];

/// Digest section an article is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    GlobalIt,
    RuTech,
    Ecosystem1C,
    Event,
}

impl Category {
    /// Render order of sections in a digest
    pub const ALL: [Category; 4] = [
        Category::Ecosystem1C,
        Category::RuTech,
        Category::GlobalIt,
        Category::Event,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::GlobalIt => "Global IT",
            Category::RuTech => "Российский IT",
            Category::Ecosystem1C => "Экосистема 1С",
            Category::Event => "События",
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Category::GlobalIt => "🌍 **Global IT**",
            Category::RuTech => "🇷🇺 **Российский IT**",
            Category::Ecosystem1C => "🟡 **Экосистема 1С**",
            Category::Event => "📅 **События**",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::GlobalIt => write!(f, "Global-IT"),
            Category::RuTech => write!(f, "RU-Tech"),
            Category::Ecosystem1C => write!(f, "1C-Ecosystem"),
            Category::Event => write!(f, "Event"),
        }
    }
}

/// One discovered news item. `url` is canonical and is the identity key.
#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_domain: String,
    pub summary: Option<String>,
    pub category: Category,
    pub priority: bool,
    pub score: Option<f32>,
}

impl Article {
    pub fn new(title: impl Into<String>, url: &str, published_at: Option<DateTime<Utc>>) -> Self {
        let url = canonicalize(url);
        let source_domain = domain_of(&url).unwrap_or_default();
        Self {
            title: title.into(),
            url,
            published_at,
            source_domain,
            summary: None,
            category: Category::GlobalIt,
            priority: false,
            score: None,
        }
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.url)
    }
}

/// Strips `utm_*` and click-id parameters plus the fragment.
/// Strings that are not absolute URLs come back trimmed but otherwise untouched.
pub fn canonicalize(raw: &str) -> String {
    let raw = raw.trim();
    let mut url = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);
    url.to_string()
}

/// Stable dedup key: hex SHA-256 of the canonical URL
pub fn fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(url).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Host of an URL without a leading `www.`
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// True when `domain` equals an allowed entry or is a sub-domain of one
pub fn domain_allowed(domain: &str, allow: &[String]) -> bool {
    allow.iter().any(|a| domain == a || domain.ends_with(&format!(".{}", a)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utm_parameters_do_not_change_the_fingerprint() {
        let plain = "https://vc.ru/tech/123-news";
        let tracked = "https://vc.ru/tech/123-news?utm_source=tg&utm_medium=social&UTM_campaign=x";
        assert_eq!(canonicalize(tracked), plain);
        assert_eq!(fingerprint(plain), fingerprint(tracked));
    }

    #[test]
    fn non_tracking_query_parameters_survive() {
        let url = "https://habr.com/ru/articles/?page=2&utm_term=rust#comments";
        assert_eq!(canonicalize(url), "https://habr.com/ru/articles/?page=2");
        assert_ne!(fingerprint(url), fingerprint("https://habr.com/ru/articles/"));
    }

    #[test]
    fn domain_strips_www_and_matches_subdomains() {
        assert_eq!(domain_of("https://www.rbc.ru/x").as_deref(), Some("rbc.ru"));
        let allow = vec!["rbc.ru".to_string()];
        assert!(domain_allowed("trends.rbc.ru", &allow));
        assert!(!domain_allowed("notrbc.ru", &allow));
    }

    #[test]
    fn article_new_canonicalizes_and_derives_domain() {
        let a = Article::new("t", " https://www.cnews.ru/news/1?utm_source=x ", None);
        assert_eq!(a.url, "https://www.cnews.ru/news/1");
        assert_eq!(a.source_domain, "cnews.ru");
    }
}
