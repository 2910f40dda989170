//! Selection of the digest articles and the two composers that turn them into text.

use crate::consts::limits;
use crate::grammar::ItemLine;
use crate::llm::{LlmClient, LlmError};
use crate::model::{Article, Category};
use crate::utils::first_sentence;
use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate};
use serde::Serialize;
use thiserror::Error;

pub(crate) const DIGEST_TITLE: &str = "🗞️ **IT‑Digest •";
pub(crate) const INSIGHT_PREFIX: &str = "💡 **Insight:**";
const NO_SUMMARY: &str = "Подробности — в источнике.";

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("LLM: {0}")] Llm(#[from] LlmError),
    #[error("Nothing to compose")] Empty,
    #[error("Serialization: {0}")] Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(&self, articles: &[Article], today: NaiveDate) -> Result<String, ComposeError>;

    /// Insight line for the articles that survived validation, if this composer derives
    /// it from them. `None` keeps whatever the draft said.
    fn insight(&self, _kept: &[Article]) -> Option<String> {
        None
    }
}

/// Picks up to `max` articles from `ranked` (best first).
///
/// The first `min(priority_min, available)` priority items are always taken; the rest
/// of the slots go in rank order, with at most `events_max` events. The result keeps
/// rank order and never contains anything that was not in `ranked`.
pub fn select(ranked: &[Article], max: usize, priority_min: usize, events_max: usize) -> Vec<Article> {
    let mut taken = vec![false; ranked.len()];
    let mut count = 0;
    let mut events = 0;

    for (i, article) in ranked.iter().enumerate() {
        if count >= priority_min.min(max) {
            break;
        }
        if article.priority {
            taken[i] = true;
            count += 1;
            if article.category == Category::Event {
                events += 1;
            }
        }
    }

    for (i, article) in ranked.iter().enumerate() {
        if count >= max {
            break;
        }
        if taken[i] {
            continue;
        }
        if article.category == Category::Event {
            if events >= events_max {
                continue;
            }
            events += 1;
        }
        taken[i] = true;
        count += 1;
    }

    ranked
        .iter()
        .zip(taken)
        .filter(|(_, t)| *t)
        .map(|(a, _)| a.clone())
        .collect()
}

pub fn digest_title(today: NaiveDate) -> String {
    format!("{} {}**", DIGEST_TITLE, today.format("%d %b %Y"))
}

// ═══════════════════════════════════════════════════════════════════
// TEMPLATE
// ═══════════════════════════════════════════════════════════════════

pub struct TemplateComposer {
    tz: FixedOffset,
}

impl TemplateComposer {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    fn item(&self, article: &Article, today: NaiveDate) -> ItemLine {
        let summary = article
            .summary
            .as_deref()
            .and_then(|s| first_sentence(s, limits::MAX_SUMMARY_CHARS))
            .unwrap_or_else(|| NO_SUMMARY.to_string());
        ItemLine {
            title: article.title.replace("**", ""),
            summary: summary.replace("**", ""),
            source: article.source_domain.clone(),
            url: article.url.clone(),
            date: article
                .published_at
                .map(|p| p.with_timezone(&self.tz).date_naive())
                .unwrap_or(today),
        }
    }

    pub fn render(&self, articles: &[Article], today: NaiveDate) -> String {
        let mut out = digest_title(today);
        out.push_str("\n\n");
        for category in Category::ALL {
            let section: Vec<&Article> = articles.iter().filter(|a| a.category == category).collect();
            if section.is_empty() {
                continue;
            }
            out.push_str(category.heading());
            out.push('\n');
            for article in section {
                out.push_str(&self.item(article, today).render());
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(&insight(articles));
        out
    }
}

/// Two sentences derived from what the digest actually holds
fn insight(articles: &[Article]) -> String {
    let busiest = Category::ALL
        .iter()
        .map(|c| (c, articles.iter().filter(|a| a.category == *c).count()))
        .max_by_key(|(_, n)| *n);
    let priority = articles.iter().filter(|a| a.priority).count();

    let first = match busiest {
        Some((category, n)) if n > 0 => format!(
            "Больше всего новостей в разделе «{}»: {} из {}.",
            category.label(),
            n,
            articles.len()
        ),
        _ => "Неделя прошла спокойно.".to_string(),
    };
    let second = if priority > 0 {
        format!("Экосистема 1С дала {} материал(а) для внимательного чтения.", priority)
    } else {
        "Заметных новостей экосистемы 1С за период не было.".to_string()
    };
    format!("{} {} {}", INSIGHT_PREFIX, first, second)
}

#[async_trait]
impl Composer for TemplateComposer {
    async fn compose(&self, articles: &[Article], today: NaiveDate) -> Result<String, ComposeError> {
        if articles.is_empty() {
            return Err(ComposeError::Empty);
        }
        Ok(self.render(articles, today))
    }

    fn insight(&self, kept: &[Article]) -> Option<String> {
        Some(insight(kept))
    }
}

// ═══════════════════════════════════════════════════════════════════
// MODEL
// ═══════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct PromptItem<'a> {
    title: &'a str,
    url: &'a str,
    source: &'a str,
    date: String,
    summary: Option<&'a str>,
    category: String,
    priority: bool,
}

/// One model call; its reply is untrusted and goes through the validator like any draft.
pub struct ModelComposer {
    llm: LlmClient,
    tz: FixedOffset,
    max_lines: usize,
}

impl ModelComposer {
    pub fn new(llm: LlmClient, tz: FixedOffset, max_lines: usize) -> Self {
        Self { llm, tz, max_lines }
    }

    pub fn prompt(&self, articles: &[Article], today: NaiveDate) -> Result<String, ComposeError> {
        let items: Vec<PromptItem> = articles
            .iter()
            .map(|a| PromptItem {
                title: &a.title,
                url: &a.url,
                source: &a.source_domain,
                date: a
                    .published_at
                    .map(|p| p.with_timezone(&self.tz).date_naive())
                    .unwrap_or(today)
                    .format(crate::grammar::DATE_FORMAT)
                    .to_string(),
                summary: a.summary.as_deref(),
                category: a.category.to_string(),
                priority: a.priority,
            })
            .collect();
        let json = serde_json::to_string_pretty(&items)?;

        let sections = Category::ALL.iter().map(|c| c.heading()).collect::<Vec<_>>().join("\n");
        Ok(format!(
            "Ты редактор еженедельного IT-дайджеста для рынка РФ и экосистемы 1С.\n\
             Используй ТОЛЬКО факты из JSON ниже, ничего не придумывай и не меняй ссылки и даты.\n\
             Выбери не более {max} новостей; все элементы с \"priority\": true включи обязательно.\n\n\
             Формат ответа строго такой:\n\
             {title}\n\n\
             Разделы (пустые пропускай), в этом порядке:\n{sections}\n\n\
             Каждая новость одной строкой:\n\
             - **Заголовок** — одно предложение сути. [Источник](url) (DD.MM.YYYY)\n\n\
             В конце одна строка из двух предложений:\n\
             {insight} ...\n\n\
             JSON:\n{json}",
            insight = INSIGHT_PREFIX,
            max = self.max_lines,
            title = digest_title(today),
            sections = sections,
            json = json,
        ))
    }
}

#[async_trait]
impl Composer for ModelComposer {
    async fn compose(&self, articles: &[Article], today: NaiveDate) -> Result<String, ComposeError> {
        if articles.is_empty() {
            return Err(ComposeError::Empty);
        }
        let prompt = self.prompt(articles, today)?;
        Ok(self.llm.complete(&prompt).await?)
    }
}
