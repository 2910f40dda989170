//! Relevance filter: freshness, include/exclude keywords, priority flag and category.
//!
//! Everything here except `body_pass` is a pure function of the keyword sets, the
//! window and `now`.

use crate::config::Settings;
use crate::model::{domain_allowed, Article, Category};
use crate::network::NewsEngine;
use crate::pool::{run_bounded, PoolLimits, TaskOutcome};
use chrono::{DateTime, Duration, Utc};

/// Output of the title stage
#[derive(Debug, Default)]
pub struct TitlePass {
    pub passed: Vec<Article>,
    /// Fresh items whose title missed the include set; body-stage candidates
    pub rejected: Vec<Article>,
    pub stale: usize,
}

#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    priority: Vec<String>,
    priority_domains: Vec<String>,
    events: Vec<String>,
    max_days: i64,
}

/// Keywords of up to three letters or digits (`it`, `ai`, `erp`) must stand as a whole
/// word; longer ones and ones with spaces are stems matched anywhere.
fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|n| {
        let whole_word = n.chars().count() <= 3 && n.chars().all(char::is_alphanumeric);
        if whole_word {
            contains_word(haystack, n)
        } else {
            haystack.contains(n.as_str())
        }
    })
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

impl RelevanceFilter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            include: settings.include_keywords.clone(),
            exclude: settings.exclude_keywords.clone(),
            priority: settings.priority_keywords.clone(),
            priority_domains: settings.priority_domains.clone(),
            events: settings.event_keywords.clone(),
            max_days: settings.max_days,
        }
    }

    /// Strict policy: an undated item is never fresh
    pub fn is_fresh(&self, article: &Article, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::days(self.max_days);
        article.published_at.map_or(false, |p| p >= cutoff)
    }

    /// At least one include keyword (or a priority domain), no exclude keyword
    pub fn matches(&self, text: &str, domain: &str) -> bool {
        let text = text.to_lowercase();
        if contains_any(&text, &self.exclude) {
            return false;
        }
        contains_any(&text, &self.include) || domain_allowed(domain, &self.priority_domains)
    }

    fn excluded(&self, text: &str) -> bool {
        contains_any(&text.to_lowercase(), &self.exclude)
    }

    pub fn title_pass(&self, articles: Vec<Article>, now: DateTime<Utc>) -> TitlePass {
        let mut out = TitlePass::default();
        for article in articles {
            if !self.is_fresh(&article, now) {
                out.stale += 1;
            } else if self.matches(&article.title, &article.source_domain) {
                out.passed.push(article);
            } else if !self.excluded(&article.title) {
                out.rejected.push(article);
            }
        }
        out
    }

    /// Fetches the pages of `candidates` (at most `max`) through the bounded pool and
    /// keeps those whose body text passes `matches`. Any failed fetch drops the candidate.
    pub async fn body_pass(
        &self,
        engine: &NewsEngine,
        candidates: Vec<Article>,
        max: usize,
        limits: PoolLimits,
    ) -> Vec<Article> {
        let candidates: Vec<Article> = candidates.into_iter().take(max).collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let tasks: Vec<_> = candidates.iter().map(|a| engine.fetch_page_text(&a.url)).collect();
        let outcomes = run_bounded(tasks, limits).await;

        let mut failed = 0;
        let mut kept = Vec::new();
        for (article, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Done(body) => {
                    if self.matches(&body, &article.source_domain) {
                        kept.push(article);
                    }
                }
                TaskOutcome::Failed(e) => {
                    log::debug!("Body fetch failed for {}: {}", article.url, e);
                    failed += 1;
                }
                TaskOutcome::TimedOut | TaskOutcome::Skipped => failed += 1,
            }
        }
        log::info!("Body filter: {} kept, {} fetch(es) failed", kept.len(), failed);
        kept
    }

    /// Sets `priority` and `category`. Ecosystem wins over Event, Event over RU/Global.
    pub fn classify(&self, article: &mut Article) {
        let text = format!("{} {}", article.title, article.summary.as_deref().unwrap_or("")).to_lowercase();
        article.priority = contains_any(&text, &self.priority)
            || domain_allowed(&article.source_domain, &self.priority_domains);

        article.category = if article.priority {
            Category::Ecosystem1C
        } else if contains_any(&text, &self.events) {
            Category::Event
        } else if article.source_domain.ends_with(".ru")
            || article.title.chars().any(|c| matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё'))
        {
            Category::RuTech
        } else {
            Category::GlobalIt
        };
    }
}
