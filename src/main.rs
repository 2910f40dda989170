//! IT/1C news digest - one scheduled run: collect, filter, compose, validate, deliver

mod compose;
mod config;
mod consts;
mod delivery;
mod filter;
mod grammar;
mod llm;
mod logic;
mod model;
mod network;
mod pool;
mod store;
mod utils;
mod validate;

use crate::compose::{Composer, ModelComposer, TemplateComposer};
use crate::config::{ComposerKind, Settings};
use crate::consts::limits;
use crate::delivery::{ChatSink, StdoutSink, TelegramSink};
use crate::llm::{LlmClient, WebSearchCollector};
use crate::logic::Pipeline;
use crate::network::{LinkProbe, NewsApiCollector, NewsEngine, RssCollector};
use crate::store::SentStore;
use crate::validate::Validator;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    log::info!("═══════════════════════════════════════════");
    log::info!("  IT-DIGEST RUN STARTED");
    log::info!("═══════════════════════════════════════════");

    if let Err(e) = run().await {
        log::error!("Digest run failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;

    let mut store = if settings.use_db {
        SentStore::open(&settings.db_path)?
    } else {
        log::info!("USE_DB=0: dedup records live in memory for this run only");
        SentStore::in_memory()?
    };
    if settings.retention_days > 0 {
        let pruned = store.prune_older_than(settings.retention_days)?;
        log::info!("Retention: pruned {} record(s) older than {} days", pruned, settings.retention_days);
    }

    let engine = NewsEngine::new(
        Duration::from_secs(limits::REQUEST_TIMEOUT_SECS),
        Duration::from_secs(settings.link_timeout_secs),
    )?;

    let llm = match &settings.openai_key {
        Some(key) if settings.needs_llm() => Some(LlmClient::new(&settings.openai_base_url, key, &settings.model)?),
        _ => None,
    };

    let tz = settings.timezone();
    let composer: Arc<dyn Composer> = match (settings.composer, &llm) {
        (ComposerKind::Model, Some(llm)) => Arc::new(ModelComposer::new(llm.clone(), tz, settings.digest_news_cnt)),
        _ => Arc::new(TemplateComposer::new(tz)),
    };

    let probe: Option<Arc<dyn LinkProbe>> = if settings.link_check { Some(engine.clone()) } else { None };
    let validator = Validator::new(settings.whitelist.clone(), settings.max_days, probe, settings.link_limits());

    let sink: Arc<dyn ChatSink> = match (&settings.tg_token, &settings.chat_id) {
        (Some(token), Some(chat)) if !settings.dry_run => Arc::new(TelegramSink::new(token, chat)),
        _ => Arc::new(StdoutSink),
    };

    let mut pipeline = Pipeline::new(&settings, engine.clone(), composer, validator, sink);

    for feed in &settings.rss_feeds {
        pipeline = pipeline.with_collector(Box::new(RssCollector::new(engine.clone(), feed.clone())));
    }
    match &settings.news_api_key {
        Some(key) => {
            for topic in &settings.news_topics {
                pipeline = pipeline.with_collector(Box::new(NewsApiCollector::new(
                    engine.clone(),
                    settings.news_api_url.clone(),
                    key.clone(),
                    topic.clone(),
                    settings.max_days,
                    settings.max_articles,
                    settings.whitelist.clone(),
                )));
            }
        }
        None => log::warn!("NEWS_API_KEY not set, search API skipped"),
    }
    if let Some(llm) = &llm {
        if settings.web_search {
            pipeline = pipeline.with_collector(Box::new(WebSearchCollector::new(
                llm.clone(),
                settings.max_days,
                settings.digest_news_cnt,
            )));
        }
        if settings.ranking {
            pipeline = pipeline.with_ranker(llm.clone());
        }
    }

    let report = pipeline.run(&mut store).await?;
    log::info!(
        "Done: {} line(s) in {} chunk(s) after {} attempt(s){}",
        report.valid_lines,
        report.chunks,
        report.attempts,
        if report.degraded { ", degraded" } else { "" }
    );
    log::info!("Dedup store: {} record(s)", store.len()?);
    Ok(())
}
