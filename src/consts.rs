//! Static source configuration with zero-allocation design.
//! All strings are &'static str; `Settings` copies what it needs at startup.

/// Default RSS feeds polled on every run
pub static RSS_FEEDS: &[&str] = &[
    "https://habr.com/ru/rss/all/all/?fl=ru",
    "https://1c.ru/news/all.rss",
    "https://infostart.ru/rss/news/",
    "https://vc.ru/rss",
];

/// Topics sent to the news-search API, one request each
pub static NEWS_TOPICS: &[&str] = &["it", "российский it", "1с"];

/// Domains trusted for the search API and the digest validator
pub static WHITELIST: &[&str] = &[
    "cnews.ru",
    "tadviser.ru",
    "vc.ru",
    "rbc.ru",
    "gazeta.ru",
    "1c.ru",
    "infostart.ru",
    "odysseyconsgroup.com",
    "rusbase.ru",
    "trends.rbc.ru",
    "habr.com",
];

/// Keyword sets used by the relevance filter and the categorizer.
/// Everything is lowercase and matched against lowercased text; keywords of up to three
/// letters match whole words only, longer ones are stems.
pub mod keywords {
    pub static INCLUDE: &[&str] = &[
        "1с", "1c", "it", "ит", "цифров", "искусственн", "ии ", "нейросет", "ai",
        "облак", "erp", "crm", "импортозамещ", "кибербез", "информационн", "софт",
        "программ", "разработ", "данных", "автоматизац", "стартап", "технолог",
    ];

    pub static EXCLUDE: &[&str] = &[
        "футбол", "спорт", "сериал", "шоу", "гороскоп", "знаменитост", "криминал",
        "football", "celebrity", "horoscope",
    ];

    /// Vendor-ecosystem markers: items matching these are priority items
    pub static PRIORITY: &[&str] = &[
        "1с", "1c", "1с:", "1c:", "инфостарт", "infostart", "бухгалтери", "зуп", "erp",
    ];

    pub static PRIORITY_DOMAINS: &[&str] = &["1c.ru", "infostart.ru", "odysseyconsgroup.com"];

    pub static EVENTS: &[&str] = &[
        "конференц", "форум", "выставк", "вебинар", "митап", "хакатон", "саммит",
        "conference", "summit", "meetup", "webinar",
    ];
}

/// HTTP headers for stealth mode
pub mod headers {
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const ACCEPT_HTML: &str =
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
    pub const ACCEPT_RSS: &str =
        "application/rss+xml,application/xml,text/xml;q=0.9,*/*;q=0.8";
    pub const ACCEPT_LANG: &str = "ru-RU,ru;q=0.9,en;q=0.8";
}

/// CSS selectors for article body extraction
pub mod selectors {
    pub const ARTICLE_TEXT: &str = "article p, main p, .article p, .post p, p";
}

/// Limits and thresholds
pub mod limits {
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
    pub const MAX_SUMMARY_CHARS: usize = 200;
    pub const MAX_TITLE_CHARS: usize = 150;
    pub const MAX_BODY_CHARS: usize = 20_000;
    pub const LLM_TIMEOUT_SECS: u64 = 120;
    pub const LLM_MAX_TOKENS: u32 = 1024;
    pub const LLM_TEMPERATURE: f32 = 0.4;
    pub const MAX_BACKOFF_MS: u64 = 30_000;
}
