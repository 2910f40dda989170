//! Business logic layer - one digest run from collection to delivery

use crate::compose::{select, Composer};
use crate::config::Settings;
use crate::delivery::{deliver, split_chunks, to_telegram_html, ChatSink, DeliveryError};
use crate::filter::RelevanceFilter;
use crate::llm::LlmClient;
use crate::model::{fingerprint, Article};
use crate::network::{Collector, NewsEngine};
use crate::store::{SentStore, StoreError};
use crate::utils::backoff_delay;
use crate::validate::{ValidatedDigest, Validator};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Store: {0}")] Store(#[from] StoreError),
    #[error("Delivery: {0}")] Delivery(#[from] DeliveryError),
    #[error("No source produced any article")] InsufficientData,
    #[error("Only {valid} valid line(s), {required} required")]
    InsufficientContent { valid: usize, required: usize },
}

/// What a finished run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub attempts: u32,
    pub valid_lines: usize,
    pub chunks: usize,
    /// Sent below `min_lines` under the soft minimum
    pub degraded: bool,
    pub marked: usize,
}

pub struct Pipeline<'a> {
    settings: &'a Settings,
    engine: Arc<NewsEngine>,
    collectors: Vec<Box<dyn Collector>>,
    filter: RelevanceFilter,
    ranker: Option<LlmClient>,
    composer: Arc<dyn Composer>,
    validator: Validator,
    sink: Arc<dyn ChatSink>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        settings: &'a Settings,
        engine: Arc<NewsEngine>,
        composer: Arc<dyn Composer>,
        validator: Validator,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            settings,
            engine,
            collectors: Vec::new(),
            filter: RelevanceFilter::new(settings),
            ranker: None,
            composer,
            validator,
            sink,
        }
    }

    pub fn with_collector(mut self, collector: Box<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn with_ranker(mut self, llm: LlmClient) -> Self {
        self.ranker = Some(llm);
        self
    }

    /// Collect → dedup → drop already sent → title filter → body filter → classify → cap.
    /// A failing collector contributes nothing; all of them coming back empty is
    /// `InsufficientData`.
    pub async fn collect_candidates(&self, store: &SentStore, now: DateTime<Utc>) -> Result<Vec<Article>, DigestError> {
        let mut raw = Vec::new();
        for collector in &self.collectors {
            match collector.collect().await {
                Ok(items) => {
                    log::info!("{}: {} item(s)", collector.name(), items.len());
                    raw.extend(items);
                }
                Err(e) => log::warn!("{}: skipped ({})", collector.name(), e),
            }
        }
        if raw.is_empty() {
            return Err(DigestError::InsufficientData);
        }

        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(raw.len());
        let mut already_sent = 0;
        for article in raw {
            if !seen.insert(article.fingerprint()) {
                continue;
            }
            if store.was_sent(&article.url)? {
                already_sent += 1;
                continue;
            }
            fresh.push(article);
        }

        let pass = self.filter.title_pass(fresh, now);
        log::info!(
            "Title filter: {} passed, {} rejected, {} stale, {} already sent",
            pass.passed.len(),
            pass.rejected.len(),
            pass.stale,
            already_sent
        );

        let mut candidates = pass.passed;
        if self.settings.body_filter && candidates.len() < self.settings.min_lines && !pass.rejected.is_empty() {
            let rescued = self
                .filter
                .body_pass(&self.engine, pass.rejected, self.settings.body_fetch_max, self.settings.body_limits())
                .await;
            candidates.extend(rescued);
        }

        for article in candidates.iter_mut() {
            self.filter.classify(article);
        }
        candidates.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        candidates.truncate(self.settings.max_articles);
        Ok(candidates)
    }

    /// Reorders by model score, best first. Any failure keeps the current order.
    async fn rank(&self, mut candidates: Vec<Article>) -> Vec<Article> {
        let Some(llm) = &self.ranker else { return candidates };
        match llm.rank(&candidates).await {
            Ok(scores) => {
                for (article, score) in candidates.iter_mut().zip(scores) {
                    article.score = score;
                }
                candidates.sort_by(|a, b| match (a.score, b.score) {
                    (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                });
            }
            Err(e) => log::warn!("Ranking skipped: {}", e),
        }
        candidates
    }

    async fn attempt(&self, store: &SentStore) -> Result<Option<ValidatedDigest>, DigestError> {
        let now = Utc::now();
        let today = now.with_timezone(&self.settings.timezone()).date_naive();

        let candidates = self.collect_candidates(store, now).await?;
        if candidates.is_empty() {
            log::warn!("No relevant candidates this attempt");
            return Ok(None);
        }
        let ranked = self.rank(candidates).await;
        let picked = select(
            &ranked,
            self.settings.digest_news_cnt,
            self.settings.priority_min,
            self.settings.events_max,
        );

        let draft = match self.composer.compose(&picked, today).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Composer failed: {}", e);
                return Ok(None);
            }
        };

        let supplied: HashSet<String> = picked.iter().map(Article::fingerprint).collect();
        let mut digest = self.validator.validate(&draft, today, Some(&supplied)).await;

        let delivered: HashSet<String> = digest.lines.iter().map(|l| fingerprint(&l.url)).collect();
        let kept: Vec<Article> = picked.iter().filter(|a| delivered.contains(&a.fingerprint())).cloned().collect();
        if let Some(line) = self.composer.insight(&kept) {
            digest.replace_insight(&line);
        }

        if let Some((got, required)) = priority_shortfall(&picked, &digest, self.settings.priority_min) {
            log::warn!("Digest holds {} priority line(s), {} required", got, required);
            return Ok(None);
        }
        Ok(Some(digest))
    }

    /// Retries until `min_lines` valid lines or `max_attempts`, then applies the degrade
    /// policy: the best attempt goes out if it reaches `min_news_soft`, otherwise the run
    /// fails and nothing is sent. URLs are marked only after every chunk was delivered.
    pub async fn run(&self, store: &mut SentStore) -> Result<RunReport, DigestError> {
        let s = self.settings;
        let mut best: Option<ValidatedDigest> = None;
        let mut saw_data = false;
        let mut attempts = 0;

        for attempt in 1..=s.max_attempts {
            attempts = attempt;
            if attempt > 1 {
                backoff_delay(attempt - 1, s.retry_delay_ms).await;
            }
            match self.attempt(store).await {
                Ok(Some(digest)) => {
                    saw_data = true;
                    let valid = digest.valid_count();
                    log::info!("Attempt {}/{}: {} valid line(s), {} dropped", attempt, s.max_attempts, valid, digest.rejected.len());
                    if best.as_ref().map_or(true, |b| valid > b.valid_count()) {
                        best = Some(digest);
                    }
                    if valid >= s.min_lines {
                        break;
                    }
                }
                Ok(None) => {
                    saw_data = true;
                    log::warn!("Attempt {}/{}: nothing to send", attempt, s.max_attempts);
                }
                Err(DigestError::InsufficientData) => {
                    log::warn!("Attempt {}/{}: no source produced anything", attempt, s.max_attempts);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(digest) = best else {
            return Err(if saw_data {
                DigestError::InsufficientContent { valid: 0, required: s.min_lines }
            } else {
                DigestError::InsufficientData
            });
        };

        let valid = digest.valid_count();
        let degraded = valid < s.min_lines;
        if degraded {
            if valid == 0 || valid < s.min_news_soft {
                return Err(DigestError::InsufficientContent { valid, required: s.min_lines });
            }
            log::warn!("Sending a shorter digest: {} of {} lines", valid, s.min_lines);
        }

        let body = if s.dry_run { digest.text.clone() } else { to_telegram_html(&digest.text) };
        let chunks = split_chunks(&body, s.chunk_limit);
        deliver(self.sink.as_ref(), &chunks).await?;

        let marked = if s.dry_run {
            0
        } else {
            store.mark_all_sent(digest.lines.iter().map(|l| l.url.as_str()))?
        };
        log::info!("Digest delivered: {} line(s), {} chunk(s), {} new record(s)", valid, chunks.len(), marked);

        Ok(RunReport { attempts, valid_lines: valid, chunks: chunks.len(), degraded, marked })
    }
}

/// `Some((got, required))` when the digest holds fewer priority lines than
/// `min(priority_min, priority articles whose lines could pass validation)`.
fn priority_shortfall(picked: &[Article], digest: &ValidatedDigest, priority_min: usize) -> Option<(usize, usize)> {
    let priority: HashSet<String> = picked.iter().filter(|a| a.priority).map(Article::fingerprint).collect();
    let available = priority.iter().filter(|fp| !digest.failed.contains(*fp)).count();
    let required = priority_min.min(available);
    let got = digest
        .lines
        .iter()
        .filter(|l| priority.contains(&fingerprint(&l.url)))
        .count();
    (got < required).then_some((got, required))
}
