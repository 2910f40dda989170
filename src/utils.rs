use crate::consts::limits;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::sleep;

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static tag pattern"))
}

fn space_regex() -> &'static Regex {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    SPACES.get_or_init(|| Regex::new(r"\s+").expect("static whitespace pattern"))
}

/// Sleeps `base_ms * 2^(attempt-1)` capped at `MAX_BACKOFF_MS`, plus up to 250ms jitter.
pub async fn backoff_delay(attempt: u32, base_ms: u64) {
    if base_ms == 0 {
        return;
    }
    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let jitter = rand::thread_rng().gen_range(0..=250);
    sleep(Duration::from_millis(exp.min(limits::MAX_BACKOFF_MS) + jitter)).await;
}

/// Feed summaries arrive as HTML fragments: drop tags, decode the common entities,
/// collapse whitespace into single spaces.
pub fn clean_text(text: &str) -> String {
    let no_tags = tag_regex().replace_all(text, " ");
    let decoded = no_tags
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&laquo;", "«")
        .replace("&raquo;", "»")
        .replace("&mdash;", "—")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    space_regex().replace_all(decoded.trim(), " ").into_owned()
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect::<String>() + "..."
}

/// First sentence of `text`, ending in a period, never longer than `max_chars`.
pub fn first_sentence(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let end = text
        .char_indices()
        .find(|&(i, c)| matches!(c, '.' | '!' | '?') && text[i + c.len_utf8()..].starts_with(' '))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(text.len());
    let mut sentence = truncate_text(text[..end].trim(), max_chars);
    if !sentence.ends_with(['.', '!', '?']) {
        sentence.push('.');
    }
    Some(sentence)
}

/// Escapes text for Telegram HTML parse mode (also safe inside attribute values)
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
