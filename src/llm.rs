//! Language-model client over an OpenAI-compatible REST API:
//! plain completions, a web-search call, and index→score ranking.

use crate::consts::limits;
use crate::grammar::{self, Line};
use crate::model::Article;
use crate::network::{Collector, FetchError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveTime};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP: {0}")] Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")] Api { status: u16, body: String },
    #[error("Unexpected response shape")] Shape,
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(limits::LLM_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }

    /// One chat completion with a single user message
    pub async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": limits::LLM_TEMPERATURE,
            "max_tokens": limits::LLM_MAX_TOKENS,
        });
        let raw = self.post("/chat/completions", body).await?;
        raw.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or(LlmError::Shape)
    }

    /// Responses-API call with the web-search tool enabled; returns the model's text
    pub async fn web_search(&self, prompt: &str) -> Result<String, LlmError> {
        let body = json!({
            "model": self.model,
            "tools": [{"type": "web_search_preview"}],
            "input": prompt,
        });
        let raw = self.post("/responses", body).await?;

        // Extract text from output[*].content[*] where type == "output_text"
        let mut text = String::new();
        if let Some(items) = raw.get("output").and_then(|v| v.as_array()) {
            for item in items {
                let Some(parts) = item.get("content").and_then(|c| c.as_array()) else { continue };
                for part in parts {
                    if part.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                        if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(t);
                        }
                    }
                }
            }
        }
        if text.is_empty() {
            return Err(LlmError::Shape);
        }
        Ok(text)
    }

    /// Asks for a 0–10 relevance score per candidate. Missing or malformed entries
    /// come back as `None`.
    pub async fn rank(&self, articles: &[Article]) -> Result<Vec<Option<f32>>, LlmError> {
        let listing = articles
            .iter()
            .enumerate()
            .map(|(i, a)| format!("{}: {} ({})", i, a.title, a.source_domain))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Оцени значимость каждой новости для рынка IT РФ и экосистемы 1С по шкале 0–10.\n\
             Ответь только JSON-объектом вида {{\"0\": 7, \"1\": 3}} без пояснений.\n\n{}",
            listing
        );
        let reply = self.complete(&prompt).await?;
        Ok(parse_scores(&reply, articles.len()))
    }
}

/// Reads `{"index": score}` out of a model reply, tolerating code fences and prose around it.
pub fn parse_scores(reply: &str, len: usize) -> Vec<Option<f32>> {
    let mut scores = vec![None; len];
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else { return scores };
    if end <= start {
        return scores;
    }

    let Ok(map) = serde_json::from_str::<HashMap<String, Value>>(&reply[start..=end]) else { return scores };
    for (key, value) in map {
        let Ok(idx) = key.trim().parse::<usize>() else { continue };
        let score = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
        if let (Some(slot), Some(score)) = (scores.get_mut(idx), score) {
            *slot = Some((score as f32).clamp(0.0, 10.0));
        }
    }
    scores
}

/// Collector backed by the model's own web search. The reply is tokenized with the
/// digest line grammar; only well-formed item lines become articles.
pub struct WebSearchCollector {
    llm: LlmClient,
    max_days: i64,
    max_items: usize,
}

impl WebSearchCollector {
    pub fn new(llm: LlmClient, max_days: i64, max_items: usize) -> Self {
        Self { llm, max_days, max_items }
    }

    fn prompt(&self) -> String {
        format!(
            "Найди в интернете {} самых значимых новостей за последние {} дней о рынке IT в России \
             и экосистеме 1С. Верни только список, каждая строка строго в формате:\n\
             - **Заголовок** — одно предложение сути. [Источник](url) (DD.MM.YYYY)\n\
             Используй только реально существующие ссылки.",
            self.max_items, self.max_days
        )
    }
}

#[async_trait]
impl Collector for WebSearchCollector {
    fn name(&self) -> String {
        "model web search".to_string()
    }

    async fn collect(&self) -> Result<Vec<Article>, FetchError> {
        let text = self
            .llm
            .web_search(&self.prompt())
            .await
            .map_err(|e| FetchError::Feed(e.to_string()))?;
        Ok(articles_from_markdown(&text))
    }
}

pub fn articles_from_markdown(text: &str) -> Vec<Article> {
    grammar::tokenize(text)
        .into_iter()
        .filter_map(|line| match line {
            Line::Item(item) => {
                let published = item
                    .date
                    .and_time(NaiveTime::MIN)
                    .and_utc()
                    .checked_add_signed(ChronoDuration::hours(12));
                Some(Article::new(item.title, &item.url, published).with_summary(Some(item.summary)))
            }
            Line::Malformed { raw, reason } => {
                log::debug!("Skipping web-search line ({}): {}", reason, raw);
                None
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[test]
    fn scores_tolerate_fences_and_garbage() {
        let reply = "```json\n{\"0\": 7, \"2\": \"4.5\", \"9\": 3, \"x\": 1, \"1\": 42}\n```";
        let scores = parse_scores(reply, 3);
        assert_eq!(scores, vec![Some(7.0), Some(10.0), Some(4.5)]);
        assert_eq!(parse_scores("no json here", 2), vec![None, None]);
    }

    #[test]
    fn markdown_lines_become_articles() {
        let md = "Вот что нашлось:\n\
                  - **Вышла 1С:ERP 2.6** — Обновление платформы. [1c.ru](https://1c.ru/news/5?utm_source=ai) (18.10.2026)\n\
                  - **Без ссылки** — текст (18.10.2026)\n";
        let items = articles_from_markdown(md);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://1c.ru/news/5");
        assert_eq!(items[0].summary.as_deref(), Some("Обновление платформы."));
    }

    #[tokio::test]
    async fn completion_and_api_errors() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  готово \n"}}]}"#)
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/responses")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let llm = LlmClient::new(&server.url(), "sk-test", "gpt-4o").unwrap();
        assert_eq!(llm.complete("hi").await.unwrap(), "готово");
        match llm.web_search("hi").await {
            Err(LlmError::Api { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn web_search_text_is_extracted() {
        let mut server = Server::new_async().await;
        let body = json!({
            "output": [
                {"type": "web_search_call", "status": "completed"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "- **Форум ЦИПР** — Прошёл форум. [cnews.ru](https://cnews.ru/f) (17.10.2026)"}
                ]}
            ]
        });
        let _m = server
            .mock("POST", "/responses")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let llm = LlmClient::new(&server.url(), "sk", "gpt-4o").unwrap();
        let text = llm.web_search("find").await.unwrap();
        assert!(text.starts_with("- **Форум ЦИПР**"));
    }
}
