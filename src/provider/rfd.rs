// src/provider/rfd.rs
//! Forum topics API provider (RedFlagDeals-style `/api/topics` JSON).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::provider::{ProviderError, TopicProvider};
use crate::topic::{Topic, META_DEALER, META_LAST_POST, META_OFFER_URL, META_REPLIES, META_VIEWS};

const PER_PAGE: u32 = 40;
const USER_AGENT: &str = concat!("rfd-topics/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TopicsPage {
    #[serde(default)]
    topics: Vec<RawTopic>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    topic_id: u64,
    title: Option<String>,
    post_time: Option<String>,
    last_post_time: Option<String>,
    web_path: Option<String>,
    total_views: Option<u64>,
    total_replies: Option<u64>,
    votes: Option<Votes>,
    offer: Option<Offer>,
}

#[derive(Debug, Deserialize)]
struct Votes {
    #[serde(default)]
    total_up: i64,
    #[serde(default)]
    total_down: i64,
}

#[derive(Debug, Deserialize)]
struct Offer {
    dealer_name: Option<String>,
    url: Option<String>,
}

/// Settings for the HTTP mode.
#[derive(Debug, Clone)]
pub struct RfdSource {
    pub base_url: String,
    pub forum_id: u32,
    pub pages: u32,
    /// Per-request client timeout; the refresher applies its own overall deadline too.
    pub request_timeout: Duration,
}

pub struct RfdProvider {
    base_url: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        forum_id: u32,
        pages: u32,
        request_timeout: Duration,
    },
}

impl RfdProvider {
    /// Serve a canned API response body. `base_url` is used to absolutize `web_path`.
    pub fn from_fixture_str(base_url: &str, body: &str) -> Self {
        Self {
            base_url: trim_base(base_url),
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn from_source(src: &RfdSource) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(src.request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            base_url: trim_base(&src.base_url),
            mode: Mode::Http {
                client,
                forum_id: src.forum_id,
                pages: src.pages.max(1),
                request_timeout: src.request_timeout,
            },
        })
    }

    fn page_url(&self, forum_id: u32, page: u32) -> String {
        format!(
            "{}/api/topics?forum_id={forum_id}&per_page={PER_PAGE}&page={page}",
            self.base_url
        )
    }

    fn parse_page(&self, body: &str, now: DateTime<Utc>) -> Result<Vec<Topic>, ProviderError> {
        let t0 = std::time::Instant::now();
        let page: TopicsPage =
            serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut out = Vec::with_capacity(page.topics.len());
        for raw in page.topics {
            if let Some(t) = self.to_topic(raw, now) {
                out.push(t);
            }
        }

        histogram!("topics_provider_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("topics_provider_items_total").increment(out.len() as u64);
        Ok(out)
    }

    fn to_topic(&self, raw: RawTopic, now: DateTime<Utc>) -> Option<Topic> {
        let title = normalize_title(raw.title.as_deref().unwrap_or_default());
        if title.is_empty() || is_sponsored(&title) {
            return None;
        }

        let score = raw
            .votes
            .map(|v| v.total_up.saturating_sub(v.total_down))
            .unwrap_or(0);
        let created_at = raw.post_time.as_deref().and_then(parse_ts).unwrap_or(now);
        let url = match raw.web_path.as_deref() {
            Some(p) if p.starts_with("http") => p.to_string(),
            Some(p) => format!("{}/{}", self.base_url, p.trim_start_matches('/')),
            None => format!("{}/{}", self.base_url, raw.topic_id),
        };

        let mut topic = Topic::new(raw.topic_id.to_string(), title, score)
            .with_url(url)
            .with_created_at(created_at);
        if let Some(offer) = raw.offer {
            if let Some(d) = offer.dealer_name.filter(|d| !d.trim().is_empty()) {
                topic = topic.with_meta(META_DEALER, d.trim());
            }
            if let Some(u) = offer.url.filter(|u| !u.trim().is_empty()) {
                topic = topic.with_meta(META_OFFER_URL, u.trim());
            }
        }
        if let Some(v) = raw.total_views {
            topic = topic.with_meta(META_VIEWS, v.to_string());
        }
        if let Some(r) = raw.total_replies {
            topic = topic.with_meta(META_REPLIES, r.to_string());
        }
        if let Some(ts) = raw.last_post_time.as_deref().and_then(parse_ts) {
            topic = topic.with_meta(META_LAST_POST, ts.to_rfc3339());
        }
        Some(topic)
    }
}

#[async_trait]
impl TopicProvider for RfdProvider {
    async fn fetch_all(&self) -> Result<Vec<Topic>, ProviderError> {
        let now = Utc::now();
        match &self.mode {
            Mode::Fixture(body) => self.parse_page(body, now),
            Mode::Http {
                client,
                forum_id,
                pages,
                request_timeout,
            } => {
                let mut all = Vec::new();
                for page in 1..=*pages {
                    let url = self.page_url(*forum_id, page);
                    let resp = client.get(&url).send().await.map_err(|e| {
                        tracing::warn!(error = ?e, provider = "rfd", page, "provider http error");
                        ProviderError::from_http(e, *request_timeout)
                    })?;
                    let status = resp.status();
                    if !status.is_success() {
                        return Err(ProviderError::Status(status.as_u16()));
                    }
                    let body = resp
                        .text()
                        .await
                        .map_err(|e| ProviderError::from_http(e, *request_timeout))?;
                    let mut topics = self.parse_page(&body, now)?;
                    tracing::debug!(target: "provider", page, count = topics.len(), "page parsed");
                    all.append(&mut topics);
                }
                Ok(all)
            }
        }
    }

    fn name(&self) -> &'static str {
        "rfd"
    }
}

fn trim_base(s: &str) -> String {
    s.trim().trim_end_matches('/').to_string()
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Titles prefixed with `[Sponsored]` are paid placements, not community deals.
pub fn is_sponsored(title: &str) -> bool {
    title
        .get(..11)
        .is_some_and(|p| p.eq_ignore_ascii_case("[sponsored]"))
}

/// Longest title kept; longer ones are cut at a char boundary and marked with `…`.
pub const MAX_TITLE_CHARS: usize = 200;

static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^<>]*>").expect("static regex"));
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Forum titles arrive with markup and HTML entities. Markup is removed before
/// entities are decoded, so an encoded `&lt;3` stays in the title as `<3`.
pub fn normalize_title(raw: &str) -> String {
    let unmarked = MARKUP.replace_all(raw, " ");
    let decoded = html_escape::decode_html_entities(&unmarked);
    let plain: String = decoded
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{00A0}' => ' ',
            c => c,
        })
        .collect();
    let title = SPACES.replace_all(plain.trim(), " ");

    match title.char_indices().nth(MAX_TITLE_CHARS) {
        Some((cut, _)) => format!("{}…", title[..cut].trim_end()),
        None => title.into_owned(),
    }
}
