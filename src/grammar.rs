//! Line grammar of a digest.
//!
//! ```text
//! item    := bullet "**" title "**" sep summary "[" source "](" url ")" ws "(" DD.MM.YYYY ")"
//! bullet  := "- " | "• " | "* " | "– " | digits ". "
//! sep     := ws* ("—" | "–" | "-" | ":")? ws*
//! heading := "#" ...
//! ```
//!
//! Every line that starts with a bullet is an item attempt: it either parses or becomes
//! a `Malformed` token carrying the reason. Lines without a bullet are plain text
//! (section headings, the digest title, the insight paragraph).

use chrono::NaiveDate;
use thiserror::Error;
use url::Url;

pub const DATE_FORMAT: &str = "%d.%m.%Y";

const BULLETS: &[&str] = &["- ", "• ", "* ", "– "];
const SEPARATORS: &[char] = &['—', '–', '-', ':'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    #[error("no bold title")] MissingTitle,
    #[error("no [source](url) link")] MissingLink,
    #[error("link is not an absolute http(s) URL")] BadUrl,
    #[error("no (DD.MM.YYYY) date")] MissingDate,
    #[error("unparseable date {0:?}")] BadDate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLine {
    pub title: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub date: NaiveDate,
}

impl ItemLine {
    /// Canonical Markdown form, the one both composers emit
    pub fn render(&self) -> String {
        let mut line = format!("- **{}**", self.title);
        if !self.summary.is_empty() {
            line.push_str(" — ");
            line.push_str(&self.summary);
        }
        line.push_str(&format!(" [{}]({}) ({})", self.source, self.url, self.date.format(DATE_FORMAT)));
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Blank,
    Heading(String),
    Text(String),
    Item(ItemLine),
    Malformed { raw: String, reason: LineError },
}

pub fn tokenize(text: &str) -> Vec<Line> {
    text.lines().map(parse_line).collect()
}

pub fn parse_line(raw: &str) -> Line {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    if line.starts_with('#') {
        return Line::Heading(line.trim_start_matches('#').trim().to_string());
    }
    match strip_bullet(line) {
        None => Line::Text(line.to_string()),
        Some(body) => match parse_item(body) {
            Ok(item) => Line::Item(item),
            Err(reason) => Line::Malformed { raw: line.to_string(), reason },
        },
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    for bullet in BULLETS {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim_start());
        }
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        return line[digits..].strip_prefix(". ").map(str::trim_start);
    }
    None
}

fn parse_item(body: &str) -> Result<ItemLine, LineError> {
    let after_open = body.strip_prefix("**").ok_or(LineError::MissingTitle)?;
    let close = after_open.find("**").ok_or(LineError::MissingTitle)?;
    let title = after_open[..close].trim();
    if title.is_empty() {
        return Err(LineError::MissingTitle);
    }
    let rest = after_open[close + 2..].trim_start();
    let rest = rest.strip_prefix(SEPARATORS).unwrap_or(rest).trim_start();

    let link_mid = rest.rfind("](").ok_or(LineError::MissingLink)?;
    let link_open = rest[..link_mid].rfind('[').ok_or(LineError::MissingLink)?;
    let url_start = link_mid + 2;
    let url_len = url_end(&rest[url_start..]).ok_or(LineError::MissingLink)?;

    let summary = rest[..link_open].trim();
    let source = rest[link_open + 1..link_mid].trim();
    let url = rest[url_start..url_start + url_len].trim();
    let tail = rest[url_start + url_len + 1..].trim();

    match Url::parse(url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
        _ => return Err(LineError::BadUrl),
    }

    let date_text = tail
        .strip_prefix('(')
        .and_then(|t| t.find(')').map(|end| &t[..end]))
        .ok_or(LineError::MissingDate)?
        .trim();
    let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
        .map_err(|_| LineError::BadDate(date_text.to_string()))?;

    Ok(ItemLine {
        title: title.to_string(),
        summary: summary.to_string(),
        source: if source.is_empty() { "Источник".to_string() } else { source.to_string() },
        url: url.to_string(),
        date,
    })
}

/// Byte length of a link target: up to the first `)` not closing a `(` inside the URL
fn url_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malformed(line: &str) -> LineError {
        match parse_line(line) {
            Line::Malformed { reason, .. } => reason,
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn well_formed_item_parses() {
        let line = "- **Вышла 1С:ERP 2.6** — Обновление ускоряет закрытие месяца. [1c.ru](https://1c.ru/news/1) (15.10.2026)";
        let Line::Item(item) = parse_line(line) else { panic!("not an item") };
        assert_eq!(item.title, "Вышла 1С:ERP 2.6");
        assert_eq!(item.summary, "Обновление ускоряет закрытие месяца.");
        assert_eq!(item.source, "1c.ru");
        assert_eq!(item.url, "https://1c.ru/news/1");
        assert_eq!(item.date, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert_eq!(item.render(), line);
    }

    #[test]
    fn parentheses_inside_the_url_stay_in_the_url() {
        let line = "- **1С** — Статья о компании. [wiki](https://ru.wikipedia.org/wiki/1С_(компания)) (15.10.2026)";
        let Line::Item(item) = parse_line(line) else { panic!("not an item") };
        assert_eq!(item.url, "https://ru.wikipedia.org/wiki/1С_(компания)");
        assert_eq!(item.date, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert_eq!(item.render(), line);
    }

    #[test]
    fn other_bullets_and_separators_are_accepted() {
        for line in [
            "• **Title**: text [src](https://a.ru/x) (01.10.2026)",
            "* **Title** - text [src](https://a.ru/x) (01.10.2026)",
            "3. **Title** text [src](https://a.ru/x) (01.10.2026).",
        ] {
            assert!(matches!(parse_line(line), Line::Item(_)), "{line}");
        }
    }

    #[test]
    fn rejection_reasons_are_explicit() {
        assert_eq!(malformed("- Title — text [s](https://a.ru) (01.10.2026)"), LineError::MissingTitle);
        assert_eq!(malformed("- **** — text [s](https://a.ru) (01.10.2026)"), LineError::MissingTitle);
        assert_eq!(malformed("- **Title** — text https://a.ru (01.10.2026)"), LineError::MissingLink);
        assert_eq!(malformed("- **Title** — text [s](a.ru/x) (01.10.2026)"), LineError::BadUrl);
        assert_eq!(malformed("- **Title** — text [s](ftp://a.ru/x) (01.10.2026)"), LineError::BadUrl);
        assert_eq!(malformed("- **Title** — text [s](https://a.ru/x)"), LineError::MissingDate);
        assert_eq!(
            malformed("- **Title** — text [s](https://a.ru/x) (2026-10-01)"),
            LineError::BadDate("2026-10-01".to_string())
        );
    }

    #[test]
    fn non_item_lines_are_classified() {
        let lines = tokenize("🗞️ **IT‑Digest**\n\n## Раздел\n🟡 **Экосистема 1С**");
        assert_eq!(lines[0], Line::Text("🗞️ **IT‑Digest**".to_string()));
        assert_eq!(lines[1], Line::Blank);
        assert_eq!(lines[2], Line::Heading("Раздел".to_string()));
        assert!(matches!(lines[3], Line::Text(_)));
    }
}
