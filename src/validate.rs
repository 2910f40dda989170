//! Line-level checks on a composed draft, whichever composer produced it.

use crate::compose::{DIGEST_TITLE, INSIGHT_PREFIX};
use crate::grammar::{self, ItemLine, Line, LineError};
use crate::model::{domain_allowed, domain_of, fingerprint, Category};
use crate::network::LinkProbe;
use crate::pool::{run_bounded, PoolLimits};
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Malformed(LineError),
    Domain(String),
    Stale(NaiveDate),
    Future(NaiveDate),
    Duplicate,
    DeadLink,
    /// Link of an article the composer was not given
    Unknown,
    /// Free text that is neither the title, a section heading nor the insight
    Prose,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(e) => write!(f, "malformed: {}", e),
            Rejection::Domain(d) => write!(f, "domain {} not allowed", d),
            Rejection::Stale(d) => write!(f, "dated {} is outside the window", d),
            Rejection::Future(d) => write!(f, "dated {} is in the future", d),
            Rejection::Duplicate => write!(f, "duplicate link"),
            Rejection::DeadLink => write!(f, "dead link"),
            Rejection::Unknown => write!(f, "link was not among the supplied articles"),
            Rejection::Prose => write!(f, "unexpected free text"),
        }
    }
}

/// Cleaned digest: only valid item lines survive, in their canonical form
#[derive(Debug, Clone, Default)]
pub struct ValidatedDigest {
    pub text: String,
    pub lines: Vec<ItemLine>,
    pub rejected: Vec<(String, Rejection)>,
    /// Fingerprints of supplied links whose lines failed the domain, date or live-link check
    pub failed: HashSet<String>,
}

impl ValidatedDigest {
    pub fn valid_count(&self) -> usize {
        self.lines.len()
    }

    /// Replaces the insight line, or appends one if the draft had none.
    pub fn replace_insight(&mut self, insight: &str) {
        let mut lines: Vec<&str> = self.text.lines().collect();
        match lines.iter().position(|l| l.starts_with(INSIGHT_PREFIX)) {
            Some(pos) => lines[pos] = insight,
            None => {
                lines.push("");
                lines.push(insight);
            }
        }
        let text = lines.join("\n");
        self.text = text;
    }
}

pub struct Validator {
    allow: Vec<String>,
    max_days: i64,
    probe: Option<Arc<dyn LinkProbe>>,
    limits: PoolLimits,
}

enum Kept {
    Section(String),
    Item(usize),
    Other(String),
}

impl Validator {
    /// An empty `allow` list accepts every domain; `probe: None` skips the live-link check.
    pub fn new(allow: Vec<String>, max_days: i64, probe: Option<Arc<dyn LinkProbe>>, limits: PoolLimits) -> Self {
        Self { allow, max_days, probe, limits }
    }

    fn check(&self, item: &ItemLine, today: NaiveDate) -> Result<(), Rejection> {
        if !self.allow.is_empty() {
            let domain = domain_of(&item.url).unwrap_or_default();
            if !domain_allowed(&domain, &self.allow) {
                return Err(Rejection::Domain(domain));
            }
        }
        if item.date < today - Duration::days(self.max_days) {
            return Err(Rejection::Stale(item.date));
        }
        if item.date > today + Duration::days(1) {
            return Err(Rejection::Future(item.date));
        }
        Ok(())
    }

    /// Checks every line of `draft`. With `supplied` set, item lines must point at one of
    /// those fingerprints; the rest are rejected as `Unknown`.
    pub async fn validate(&self, draft: &str, today: NaiveDate, supplied: Option<&HashSet<String>>) -> ValidatedDigest {
        let mut out = ValidatedDigest::default();
        let mut kept = Vec::new();
        let mut items: Vec<ItemLine> = Vec::new();
        let mut seen = HashSet::new();

        for raw in draft.lines() {
            match grammar::parse_line(raw) {
                Line::Item(item) => {
                    let fp = fingerprint(&item.url);
                    if supplied.is_some_and(|known| !known.contains(&fp)) {
                        out.rejected.push((raw.trim().to_string(), Rejection::Unknown));
                        continue;
                    }
                    if let Err(reason) = self.check(&item, today) {
                        out.failed.insert(fp);
                        out.rejected.push((raw.trim().to_string(), reason));
                        continue;
                    }
                    if !seen.insert(fp) {
                        out.rejected.push((raw.trim().to_string(), Rejection::Duplicate));
                        continue;
                    }
                    kept.push(Kept::Item(items.len()));
                    items.push(item);
                }
                Line::Malformed { raw, reason } => out.rejected.push((raw, Rejection::Malformed(reason))),
                Line::Heading(text) if is_section(&text) => kept.push(Kept::Section(raw.trim().to_string())),
                Line::Text(text) if is_section(&text) => kept.push(Kept::Section(text)),
                Line::Text(text) if text.starts_with(DIGEST_TITLE) || text.starts_with(INSIGHT_PREFIX) => {
                    kept.push(Kept::Other(text))
                }
                Line::Heading(_) | Line::Text(_) => out.rejected.push((raw.trim().to_string(), Rejection::Prose)),
                Line::Blank => kept.push(Kept::Other(String::new())),
            }
        }

        let alive = self.probe_links(&items).await;
        for (item, ok) in items.iter().zip(&alive) {
            if !ok {
                out.failed.insert(fingerprint(&item.url));
                out.rejected.push((item.render(), Rejection::DeadLink));
            }
        }

        out.text = assemble(&kept, &items, &alive);
        out.lines = items.into_iter().zip(alive).filter(|(_, ok)| *ok).map(|(i, _)| i).collect();
        for (line, reason) in &out.rejected {
            log::debug!("Dropped ({}): {}", reason, line);
        }
        out
    }

    async fn probe_links(&self, items: &[ItemLine]) -> Vec<bool> {
        let Some(probe) = &self.probe else { return vec![true; items.len()] };
        let tasks: Vec<_> = items
            .iter()
            .map(|item| {
                let probe = Arc::clone(probe);
                async move { Ok::<_, Infallible>(probe.is_alive(&item.url).await) }
            })
            .collect();
        run_bounded(tasks, self.limits)
            .await
            .into_iter()
            .map(|o| o.ok().unwrap_or(false))
            .collect()
    }
}

/// A category heading, either as composed or as a Markdown `#` heading naming the section
fn is_section(text: &str) -> bool {
    Category::ALL.iter().any(|c| c.heading() == text || text.trim_matches('*').trim() == c.label())
}

/// Rebuilds the text from kept lines, dropping sections left without items
/// and collapsing runs of blank lines.
fn assemble(kept: &[Kept], items: &[ItemLine], alive: &[bool]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for (pos, entry) in kept.iter().enumerate() {
        match entry {
            Kept::Item(i) if alive[*i] => lines.push(items[*i].render()),
            Kept::Item(_) => {}
            Kept::Section(text) => {
                let has_items = kept[pos + 1..]
                    .iter()
                    .take_while(|k| !matches!(k, Kept::Section(_)))
                    .any(|k| matches!(k, Kept::Item(i) if alive[*i]));
                if has_items {
                    lines.push(text.clone());
                }
            }
            Kept::Other(text) => {
                if text.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
                    continue;
                }
                lines.push(text.clone());
            }
        }
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockito::Server;
    use std::time::Duration as StdDuration;

    fn limits() -> PoolLimits {
        PoolLimits {
            concurrency: 4,
            per_task: StdDuration::from_secs(5),
            overall: StdDuration::from_secs(10),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    struct DeadOn(&'static str);

    #[async_trait]
    impl LinkProbe for DeadOn {
        async fn is_alive(&self, url: &str) -> bool {
            !url.contains(self.0)
        }
    }

    const DRAFT: &str = "🗞️ **IT‑Digest • 19 Oct 2026**\n\n\
        🟡 **Экосистема 1С**\n\
        - **Релиз 1С:ERP** — Вышла новая версия. [1c.ru](https://1c.ru/news/1) (18.10.2026)\n\
        - **Старая новость** — Давно было. [1c.ru](https://1c.ru/news/0) (01.09.2026)\n\n\
        🌍 **Global IT**\n\
        - **Спам** — Реклама. [spam.com](https://spam.com/x) (18.10.2026)\n\
        - сломанная строка без ссылки\n\n\
        💡 **Insight:** Всё спокойно. Ждём релизов.";

    #[tokio::test]
    async fn invalid_lines_are_dropped_and_empty_sections_removed() {
        let validator = Validator::new(vec!["1c.ru".to_string()], 10, None, limits());
        let out = validator.validate(DRAFT, today(), None).await;

        assert_eq!(out.valid_count(), 1);
        assert_eq!(out.rejected.len(), 3);
        assert!(out.rejected.iter().any(|(_, r)| matches!(r, Rejection::Stale(_))));
        assert!(out.rejected.iter().any(|(_, r)| matches!(r, Rejection::Domain(d) if d == "spam.com")));
        assert!(out.rejected.iter().any(|(_, r)| matches!(r, Rejection::Malformed(LineError::MissingTitle))));
        assert!(out.text.contains("Экосистема 1С"));
        assert!(!out.text.contains("Global IT"));
        assert!(out.text.ends_with("Ждём релизов."));
        assert!(!out.text.contains("\n\n\n"));
    }

    #[tokio::test]
    async fn duplicates_and_future_dates_are_rejected() {
        let draft = "- **A** — a. [x](https://vc.ru/a?utm_source=1) (18.10.2026)\n\
                     - **A again** — a. [x](https://vc.ru/a) (18.10.2026)\n\
                     - **B** — b. [x](https://vc.ru/b) (25.10.2026)";
        let out = Validator::new(Vec::new(), 10, None, limits()).validate(draft, today(), None).await;
        assert_eq!(out.valid_count(), 1);
        assert_eq!(out.rejected[0].1, Rejection::Duplicate);
        assert_eq!(out.rejected[1].1, Rejection::Future(NaiveDate::from_ymd_opt(2026, 10, 25).unwrap()));
    }

    #[tokio::test]
    async fn probe_failures_mark_links_dead() {
        let draft = "- **A** — a. [x](https://vc.ru/a) (18.10.2026)\n- **B** — b. [x](https://vc.ru/b) (18.10.2026)";
        let probe: Arc<dyn LinkProbe> = Arc::new(DeadOn("/b"));
        let out = Validator::new(Vec::new(), 10, Some(probe), limits()).validate(draft, today(), None).await;
        assert_eq!(out.valid_count(), 1);
        assert_eq!(out.lines[0].url, "https://vc.ru/a");
        assert_eq!(out.rejected, vec![(out.rejected[0].0.clone(), Rejection::DeadLink)]);
    }

    #[tokio::test]
    async fn only_supplied_links_and_known_lines_survive() {
        let draft = "🗞️ **IT‑Digest • 19 Oct 2026**\n\n\
                     Вот подборка за неделю, всё проверено!\n\
                     ## Экосистема 1С\n\
                     - **Настоящая** — Есть. [vc.ru](https://vc.ru/real/1?utm_source=tg) (18.10.2026)\n\
                     - **Выдуманная** — Нет. [vc.ru](https://vc.ru/fake/1) (18.10.2026)\n\
                     - **Старая** — Была. [vc.ru](https://vc.ru/real/2) (01.09.2026)\n\n\
                     💡 **Insight:** Всё спокойно. Ждём релизов.";
        let supplied: HashSet<String> = ["https://vc.ru/real/1", "https://vc.ru/real/2"].iter().map(|u| fingerprint(u)).collect();
        let out = Validator::new(Vec::new(), 10, None, limits()).validate(draft, today(), Some(&supplied)).await;

        assert_eq!(out.valid_count(), 1);
        assert_eq!(out.lines[0].title, "Настоящая");
        assert!(out.rejected.iter().any(|(l, r)| *r == Rejection::Unknown && l.contains("/fake/1")));
        assert!(out.rejected.iter().any(|(l, r)| *r == Rejection::Prose && l.starts_with("Вот подборка")));
        assert_eq!(out.failed, HashSet::from([fingerprint("https://vc.ru/real/2")]));
        assert!(out.text.starts_with("🗞️ **IT‑Digest"));
        assert!(out.text.contains("## Экосистема 1С"));
        assert!(!out.text.contains("Вот подборка"));
        assert!(out.text.ends_with("Ждём релизов."));
    }

    #[test]
    fn insight_is_replaced_or_appended() {
        let mut digest = ValidatedDigest { text: "t\n\n- x\n\n💡 **Insight:** old.".to_string(), ..Default::default() };
        digest.replace_insight("💡 **Insight:** new.");
        assert_eq!(digest.text, "t\n\n- x\n\n💡 **Insight:** new.");

        let mut bare = ValidatedDigest { text: "t\n\n- x".to_string(), ..Default::default() };
        bare.replace_insight("💡 **Insight:** new.");
        assert_eq!(bare.text, "t\n\n- x\n\n💡 **Insight:** new.");
    }

    #[tokio::test]
    async fn head_404_drops_the_line_and_it_does_not_count() {
        let mut server = Server::new_async().await;
        let _ok = server.mock("HEAD", "/live").with_status(200).create_async().await;
        let _dead = server.mock("HEAD", "/dead").with_status(404).create_async().await;

        let draft = format!(
            "🟡 **Экосистема 1С**\n\
             - **Живая** — Есть. [src]({base}/live) (18.10.2026)\n\
             - **Мёртвая** — Нет. [src]({base}/dead) (18.10.2026)\n",
            base = server.url()
        );
        let probe: Arc<dyn LinkProbe> = crate::network::tests::engine();
        let out = Validator::new(Vec::new(), 10, Some(probe), limits()).validate(&draft, today(), None).await;

        assert_eq!(out.valid_count(), 1);
        assert!(out.text.contains("/live"));
        assert!(!out.text.contains("/dead"));
        assert!(out.valid_count() < 6);
    }
}
