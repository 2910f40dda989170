//! Delivery: Markdown → Telegram HTML, tag-safe chunking, and the chat sinks.

use crate::grammar::{self, Line, DATE_FORMAT};
use crate::utils::escape_html;
use async_trait::async_trait;
use regex::Regex;
use std::io::Write;
use std::sync::OnceLock;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, Recipient};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Telegram rejected chunk {chunk}: {source}")]
    Telegram { chunk: usize, source: teloxide::RequestError },
    #[error("IO: {0}")] Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_chunk(&self, index: usize, text: &str) -> Result<(), DeliveryError>;
}

/// Sends chunks in order. The first failure ends delivery; chunks already sent stay sent.
pub async fn deliver(sink: &dyn ChatSink, chunks: &[String]) -> Result<usize, DeliveryError> {
    for (i, chunk) in chunks.iter().enumerate() {
        sink.send_chunk(i, chunk).await?;
        log::info!("Delivered chunk {}/{} ({} chars)", i + 1, chunks.len(), chunk.chars().count());
    }
    Ok(chunks.len())
}

fn bold_regex() -> &'static Regex {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    BOLD.get_or_init(|| Regex::new(r"\*\*(.+?)\*\*").expect("static bold pattern"))
}

/// Renders the validated Markdown digest for `ParseMode::Html`.
/// Every literal `&`, `<`, `>` and `"` is escaped; markup comes only from here.
pub fn to_telegram_html(markdown: &str) -> String {
    grammar::tokenize(markdown)
        .into_iter()
        .map(|line| match line {
            Line::Blank => String::new(),
            Line::Heading(text) => format!("<b>{}</b>", escape_html(&text)),
            Line::Text(text) => bold_regex().replace_all(&escape_html(&text), "<b>$1</b>").into_owned(),
            Line::Item(item) => {
                let mut out = format!("• <b>{}</b>", escape_html(&item.title));
                if !item.summary.is_empty() {
                    out.push_str(" — ");
                    out.push_str(&escape_html(&item.summary));
                }
                out.push_str(&format!(
                    " <a href=\"{}\">{}</a> ({})",
                    escape_html(&item.url),
                    escape_html(&item.source),
                    item.date.format(DATE_FORMAT)
                ));
                out
            }
            Line::Malformed { raw, .. } => escape_html(&raw),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits `text` into chunks of at most `max_chars` characters whose concatenation is
/// exactly `text`. Cuts go after the last newline that fits; failing that, at the last
/// whitespace or character where no tag, element or entity is open.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let cut = cut_point(&rest[..window_end]).unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Best byte offset (> 0) to end a chunk inside `window`
fn cut_point(window: &str) -> Option<usize> {
    let mut in_tag = false;
    let mut closing = false;
    let mut tag_start = 0;
    let mut in_entity = false;
    let mut depth: usize = 0;
    let mut last_newline = None;
    let mut last_space = None;
    let mut last_safe = None;

    for (i, c) in window.char_indices() {
        let safe_before = !in_tag && !in_entity && depth == 0;
        if safe_before && i > 0 {
            last_safe = Some(i);
        }
        match c {
            '<' if !in_tag => {
                in_tag = true;
                closing = window[i + 1..].starts_with('/');
                tag_start = i;
            }
            '>' if in_tag => {
                in_tag = false;
                let self_closing = window[tag_start..i].ends_with('/');
                if closing {
                    depth = depth.saturating_sub(1);
                } else if !self_closing {
                    depth += 1;
                }
            }
            '&' if !in_tag => in_entity = true,
            ';' if in_entity => in_entity = false,
            c if in_entity && c.is_whitespace() => in_entity = false,
            _ => {}
        }
        let after = i + c.len_utf8();
        if !in_tag && !in_entity && depth == 0 {
            if c == '\n' {
                last_newline = Some(after);
            } else if c.is_whitespace() {
                last_space = Some(after);
            }
        }
    }
    if !in_tag && !in_entity && depth == 0 {
        last_safe = Some(window.len());
    }
    last_newline.or(last_space).or(last_safe).filter(|&p| p > 0)
}

// ═══════════════════════════════════════════════════════════════════
// SINKS
// ═══════════════════════════════════════════════════════════════════

pub struct TelegramSink {
    bot: Bot,
    recipient: Recipient,
}

impl TelegramSink {
    /// `chat` is a numeric chat id or an `@channel` username
    pub fn new(token: &str, chat: &str) -> Self {
        let recipient = match chat.trim().parse::<i64>() {
            Ok(id) => Recipient::Id(ChatId(id)),
            Err(_) => Recipient::ChannelUsername(chat.trim().to_string()),
        };
        Self { bot: Bot::new(token), recipient }
    }
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send_chunk(&self, index: usize, text: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(self.recipient.clone(), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .await
            .map_err(|source| DeliveryError::Telegram { chunk: index, source })?;
        Ok(())
    }
}

/// `DRY_RUN` sink: prints chunks instead of posting them
pub struct StdoutSink;

#[async_trait]
impl ChatSink for StdoutSink {
    async fn send_chunk(&self, index: usize, text: &str) -> Result<(), DeliveryError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "───────── chunk {} ─────────", index + 1)?;
        writeln!(out, "{}", text)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every chunk; refuses the chunk at `fail_at` if set.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<String>>,
        pub fail_at: Option<usize>,
    }

    #[async_trait]
    impl ChatSink for RecordingSink {
        async fn send_chunk(&self, index: usize, text: &str) -> Result<(), DeliveryError> {
            if self.fail_at == Some(index) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "400 Bad Request").into());
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn html_digest(lines: usize) -> String {
        let md = (0..lines)
            .map(|i| format!("- **Новость {i} & <тег>** — Суть. [vc.ru](https://vc.ru/n/{i}?a=1&b=2) (18.10.2026)"))
            .collect::<Vec<_>>()
            .join("\n");
        to_telegram_html(&format!("🗞️ **IT‑Digest**\n\n{md}"))
    }

    #[test]
    fn html_escapes_titles_and_urls() {
        let html = html_digest(1);
        assert!(html.starts_with("🗞️ <b>IT‑Digest</b>"));
        assert!(html.contains("• <b>Новость 0 &amp; &lt;тег&gt;</b> — Суть."));
        assert!(html.contains("<a href=\"https://vc.ru/n/0?a=1&amp;b=2\">vc.ru</a> (18.10.2026)"));
    }

    #[test]
    fn chunks_concatenate_back_and_respect_the_limit() {
        let html = html_digest(60);
        for limit in [100, 250, 1000, 4000] {
            let chunks = split_chunks(&html, limit);
            assert_eq!(chunks.concat(), html);
            assert!(chunks.iter().all(|c| c.chars().count() <= limit));
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
        assert_eq!(split_chunks("short", 4000), vec!["short".to_string()]);
    }

    #[test]
    fn newline_splits_keep_every_chunk_balanced() {
        let html = html_digest(40);
        for chunk in split_chunks(&html, 300) {
            assert_eq!(chunk.matches("<b>").count(), chunk.matches("</b>").count());
            assert_eq!(chunk.matches("<a ").count(), chunk.matches("</a>").count());
        }
    }

    #[test]
    fn long_lines_are_cut_outside_markup() {
        let line = format!("<b>{}</b> {}", "жирный ".repeat(5), "слово ".repeat(40));
        let chunks = split_chunks(&line, 60);
        assert_eq!(chunks.concat(), line);
        assert_eq!(chunks[0].matches("<b>").count(), chunks[0].matches("</b>").count());
        assert!(chunks[0].ends_with(' '));
        let plain = "x".repeat(25);
        assert_eq!(split_chunks(&plain, 10), vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[tokio::test]
    async fn first_refused_chunk_fails_delivery() {
        let sink = RecordingSink { fail_at: Some(1), ..Default::default() };
        let chunks = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = deliver(&sink, &chunks).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Io(_)));
        assert_eq!(*sink.sent.lock().unwrap(), vec!["a".to_string()]);
    }
}
