//! Run configuration. Built once by `main` and passed down by reference;
//! nothing below the entry point reads the environment.

use crate::consts::{self, keywords};
use crate::pool::PoolLimits;
use chrono::{FixedOffset, Offset, Utc};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("inconsistent settings: {0}")]
    Inconsistent(String),
}

/// How the digest text is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposerKind {
    Template,
    Model,
}

impl FromStr for ComposerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "template" => Ok(ComposerKind::Template),
            "model" | "llm" | "gpt" => Ok(ComposerKind::Model),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub tg_token: Option<String>,
    pub chat_id: Option<String>,
    pub openai_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub news_api_key: Option<String>,
    pub news_api_url: String,
    pub news_topics: Vec<String>,
    pub rss_feeds: Vec<String>,
    pub whitelist: Vec<String>,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
    pub priority_keywords: Vec<String>,
    pub priority_domains: Vec<String>,
    pub event_keywords: Vec<String>,
    pub max_days: i64,
    pub max_articles: usize,
    pub digest_news_cnt: usize,
    pub min_lines: usize,
    pub min_news_soft: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub priority_min: usize,
    pub events_max: usize,
    pub fetch_concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub body_fetch_max: usize,
    pub body_stage_timeout_secs: u64,
    pub body_filter: bool,
    pub link_check: bool,
    pub link_timeout_secs: u64,
    pub composer: ComposerKind,
    pub ranking: bool,
    pub web_search: bool,
    pub use_db: bool,
    pub db_path: String,
    pub retention_days: i64,
    pub chunk_limit: usize,
    pub tz_offset_hours: i32,
    pub dry_run: bool,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tg_token: None,
            chat_id: None,
            openai_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            news_api_key: None,
            news_api_url: "https://newsapi.org/v2/everything".to_string(),
            news_topics: owned(consts::NEWS_TOPICS),
            rss_feeds: owned(consts::RSS_FEEDS),
            whitelist: owned(consts::WHITELIST),
            include_keywords: owned(keywords::INCLUDE),
            exclude_keywords: owned(keywords::EXCLUDE),
            priority_keywords: owned(keywords::PRIORITY),
            priority_domains: owned(keywords::PRIORITY_DOMAINS),
            event_keywords: owned(keywords::EVENTS),
            max_days: 10,
            max_articles: 30,
            digest_news_cnt: 12,
            min_lines: 6,
            min_news_soft: 3,
            max_attempts: 3,
            retry_delay_ms: 2000,
            priority_min: 3,
            events_max: 2,
            fetch_concurrency: 10,
            fetch_timeout_secs: 8,
            body_fetch_max: 50,
            body_stage_timeout_secs: 60,
            body_filter: true,
            link_check: true,
            link_timeout_secs: 5,
            composer: ComposerKind::Template,
            ranking: false,
            web_search: false,
            use_db: true,
            db_path: "sent.db".to_string(),
            retention_days: 0,
            chunk_limit: 4000,
            tz_offset_hours: 3,
            dry_run: false,
        }
    }
}

struct Lookup<F> {
    get: F,
}

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.get)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { key, value: v }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value: v }),
            },
        }
    }

    fn list(&self, key: &str, default: Vec<String>) -> Vec<String> {
        match self.string(key) {
            None => default,
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl Settings {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup { get };
        let d = Settings::default();

        let composer = match env.string("COMPOSER") {
            None => d.composer,
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "COMPOSER", value: v })?,
        };

        let settings = Settings {
            tg_token: env.string("TG_TOKEN").or_else(|| env.string("TELOXIDE_TOKEN")),
            chat_id: env.string("CHAT_ID"),
            openai_key: env.string("OPENAI_API_KEY"),
            openai_base_url: env
                .string("OPENAI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.openai_base_url),
            model: env.string("MODEL").unwrap_or(d.model),
            news_api_key: env.string("NEWS_API_KEY"),
            news_api_url: env.string("NEWSAPI_URL").unwrap_or(d.news_api_url),
            news_topics: env.list("NEWS_TOPICS", d.news_topics),
            rss_feeds: env
                .string("RSS_FEEDS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or(d.rss_feeds),
            whitelist: env.list("WHITELIST", d.whitelist),
            include_keywords: env.list("INCLUDE_KEYWORDS", d.include_keywords),
            exclude_keywords: env.list("EXCLUDE_KEYWORDS", d.exclude_keywords),
            priority_keywords: env.list("PRIORITY_KEYWORDS", d.priority_keywords),
            priority_domains: env.list("PRIORITY_DOMAINS", d.priority_domains),
            event_keywords: env.list("EVENT_KEYWORDS", d.event_keywords),
            max_days: env.parse("MAX_DAYS", d.max_days)?,
            max_articles: env.parse("MAX_ARTICLES", d.max_articles)?,
            digest_news_cnt: env.parse("DIGEST_NEWS_CNT", d.digest_news_cnt)?,
            min_lines: env.parse("MIN_LINES", d.min_lines)?,
            min_news_soft: env.parse("MIN_NEWS_SOFT", d.min_news_soft)?,
            max_attempts: env.parse("MAX_ATTEMPTS", d.max_attempts)?,
            retry_delay_ms: env.parse("RETRY_DELAY_MS", d.retry_delay_ms)?,
            priority_min: env.parse("PRIORITY_MIN", d.priority_min)?,
            events_max: env.parse("EVENTS_MAX", d.events_max)?,
            fetch_concurrency: env.parse("FETCH_CONCURRENCY", d.fetch_concurrency)?,
            fetch_timeout_secs: env.parse("FETCH_TIMEOUT_SECS", d.fetch_timeout_secs)?,
            body_fetch_max: env.parse("BODY_FETCH_MAX", d.body_fetch_max)?,
            body_stage_timeout_secs: env.parse("BODY_STAGE_TIMEOUT_SECS", d.body_stage_timeout_secs)?,
            body_filter: env.flag("BODY_FILTER", d.body_filter)?,
            link_check: env.flag("LINK_CHECK", d.link_check)?,
            link_timeout_secs: env.parse("LINK_TIMEOUT_SECS", d.link_timeout_secs)?,
            composer,
            ranking: env.flag("RANKING", d.ranking)?,
            web_search: env.flag("WEB_SEARCH", d.web_search)?,
            use_db: env.flag("USE_DB", d.use_db)?,
            db_path: env.string("DB_PATH").unwrap_or(d.db_path),
            retention_days: env.parse("RETENTION_DAYS", d.retention_days)?,
            chunk_limit: env.parse("CHUNK_LIMIT", d.chunk_limit)?,
            tz_offset_hours: env.parse("TZ_OFFSET_HOURS", d.tz_offset_hours)?,
            dry_run: env.flag("DRY_RUN", d.dry_run)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run {
            if self.tg_token.is_none() {
                return Err(ConfigError::Missing("TG_TOKEN"));
            }
            if self.chat_id.is_none() {
                return Err(ConfigError::Missing("CHAT_ID"));
            }
        }
        if self.needs_llm() && self.openai_key.is_none() {
            return Err(ConfigError::Missing("OPENAI_API_KEY"));
        }
        if self.min_news_soft > self.min_lines || self.min_lines > self.digest_news_cnt {
            return Err(ConfigError::Inconsistent(format!(
                "expected MIN_NEWS_SOFT ({}) <= MIN_LINES ({}) <= DIGEST_NEWS_CNT ({})",
                self.min_news_soft, self.min_lines, self.digest_news_cnt
            )));
        }
        if self.max_attempts == 0 || self.fetch_concurrency == 0 {
            return Err(ConfigError::Inconsistent(
                "MAX_ATTEMPTS and FETCH_CONCURRENCY must be positive".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.tz_offset_hours) {
            return Err(ConfigError::Invalid { key: "TZ_OFFSET_HOURS", value: self.tz_offset_hours.to_string() });
        }
        if self.chunk_limit < 100 || self.chunk_limit > 4096 {
            return Err(ConfigError::Invalid { key: "CHUNK_LIMIT", value: self.chunk_limit.to_string() });
        }
        Ok(())
    }

    pub fn needs_llm(&self) -> bool {
        self.composer == ComposerKind::Model || self.ranking || self.web_search
    }

    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Worker pool bounds for the page-body stage
    pub fn body_limits(&self) -> PoolLimits {
        PoolLimits {
            concurrency: self.fetch_concurrency,
            per_task: Duration::from_secs(self.fetch_timeout_secs),
            overall: Duration::from_secs(self.body_stage_timeout_secs),
        }
    }

    /// Worker pool bounds for the live-link check
    pub fn link_limits(&self) -> PoolLimits {
        PoolLimits {
            concurrency: self.fetch_concurrency,
            per_task: Duration::from_secs(self.link_timeout_secs + 1),
            overall: Duration::from_secs(self.body_stage_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let s = from_map(&[("TG_TOKEN", "t"), ("CHAT_ID", "-100")]).unwrap();
        assert_eq!(s.max_days, 10);
        assert_eq!(s.min_lines, 6);
        assert_eq!(s.composer, ComposerKind::Template);
        assert!(s.use_db);
        assert!(s.rss_feeds.iter().any(|f| f.contains("1c.ru")));
    }

    #[test]
    fn overrides_and_lists_are_parsed() {
        let s = from_map(&[
            ("DRY_RUN", "1"),
            ("MAX_DAYS", "3"),
            ("WHITELIST", "Habr.com, vc.ru ,"),
            ("COMPOSER", "model"),
            ("OPENAI_API_KEY", "sk"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1/"),
        ])
        .unwrap();
        assert_eq!(s.max_days, 3);
        assert_eq!(s.whitelist, vec!["habr.com", "vc.ru"]);
        assert_eq!(s.composer, ComposerKind::Model);
        assert_eq!(s.openai_base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn missing_chat_credentials_are_reported() {
        let err = from_map(&[("TG_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CHAT_ID")));
    }

    #[test]
    fn model_composer_requires_api_key() {
        let err = from_map(&[("DRY_RUN", "1"), ("COMPOSER", "model")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OPENAI_API_KEY")));
    }

    #[test]
    fn bad_numbers_and_inconsistent_bounds_fail() {
        assert!(matches!(
            from_map(&[("DRY_RUN", "1"), ("MAX_DAYS", "ten")]),
            Err(ConfigError::Invalid { key: "MAX_DAYS", .. })
        ));
        assert!(matches!(
            from_map(&[("DRY_RUN", "1"), ("MIN_NEWS_SOFT", "8")]),
            Err(ConfigError::Inconsistent(_))
        ));
    }
}
