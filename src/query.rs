//! # Query Service
//! Read-only facade over the [`TopicStore`]. Every call loads the current
//! snapshot once and answers entirely from it, so a publish that lands
//! mid-request cannot mix generations into one response.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::TopicStore;
use crate::topic::{Snapshot, Topic, META_DEALER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Score,
    Recent,
    Views,
    Title,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" | "votes" => Ok(SortKey::Score),
            "recent" | "created" | "new" => Ok(SortKey::Recent),
            "views" => Ok(SortKey::Views),
            "title" => Ok(SortKey::Title),
            other => Err(format!("unknown sort key '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{other}'")),
        }
    }
}

/// Filter, sort and limit options for [`QueryService::list`]. All optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub min_score: Option<i64>,
    /// Case-insensitive substring over title and dealer.
    pub keyword: Option<String>,
    pub sort: Option<SortKey>,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn sorted_by(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort = Some(key);
        self.order = order;
        self
    }

    pub fn min_score(mut self, score: i64) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn keyword(mut self, kw: impl Into<String>) -> Self {
        self.keyword = Some(kw.into());
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, t: &Topic, needle: Option<&str>) -> bool {
        if self.min_score.is_some_and(|min| t.score < min) {
            return false;
        }
        match needle {
            None => true,
            Some(n) => {
                t.title.to_lowercase().contains(n)
                    || t
                        .metadata
                        .get(META_DEALER)
                        .is_some_and(|d| d.to_lowercase().contains(n))
            }
        }
    }
}

/// One response worth of topics, all taken from the same snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Listing {
    pub generation: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Matches before `limit` was applied.
    pub total: usize,
    pub topics: Vec<Topic>,
}

/// Apply `q` to one snapshot.
pub fn list_in(snapshot: &Snapshot, q: &ListQuery) -> Listing {
    let needle = q
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase);

    let mut topics: Vec<Topic> = snapshot
        .topics()
        .iter()
        .filter(|t| q.matches(t, needle.as_deref()))
        .cloned()
        .collect();
    let total = topics.len();

    if let Some(key) = q.sort {
        // stable: ties keep snapshot order
        topics.sort_by(|a, b| {
            let ord = compare(key, a, b);
            match q.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
    }
    if let Some(n) = q.limit {
        topics.truncate(n);
    }

    Listing {
        generation: snapshot.generation,
        fetched_at: snapshot.fetched_at,
        total,
        topics,
    }
}

fn compare(key: SortKey, a: &Topic, b: &Topic) -> Ordering {
    match key {
        SortKey::Score => a.score.cmp(&b.score),
        SortKey::Recent => a.created_at.cmp(&b.created_at),
        SortKey::Views => a.views().cmp(&b.views()),
        SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
    }
}

#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<TopicStore>,
}

impl QueryService {
    pub fn new(store: Arc<TopicStore>) -> Self {
        Self { store }
    }

    /// Empty listing (generation 0) until the first successful fetch.
    pub fn list(&self, q: &ListQuery) -> Listing {
        list_in(&self.store.current(), q)
    }

    /// `None` means not found, including before the first fetch.
    pub fn get(&self, id: &str) -> Option<Topic> {
        self.store.current().find(id).cloned()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.current()
    }
}
