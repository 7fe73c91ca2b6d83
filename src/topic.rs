//! # Topics and snapshots
//! A [`Topic`] is one harvested forum thread. A [`Snapshot`] is the immutable,
//! fully-formed collection produced by one successful fetch.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata keys the forum provider fills in.
pub const META_DEALER: &str = "dealer";
pub const META_OFFER_URL: &str = "offer_url";
pub const META_VIEWS: &str = "views";
pub const META_REPLIES: &str = "replies";
pub const META_LAST_POST: &str = "last_post_time";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: String,
    pub title: String,
    pub url: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Topic {
    pub fn new(id: impl Into<String>, title: impl Into<String>, score: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: String::new(),
            score,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = ts;
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// View count from metadata, 0 when the provider did not report one.
    pub fn views(&self) -> u64 {
        self.metadata
            .get(META_VIEWS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Immutable topic collection plus the metadata of the fetch that produced it.
///
/// Readers hold an `Arc<Snapshot>` for as long as they like; a newer publish
/// never touches an existing snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub generation: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    topics: Vec<Topic>,
}

impl Snapshot {
    /// The "nothing loaded yet" sentinel.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            fetched_at: None,
            topics: Vec::new(),
        }
    }

    /// Build a snapshot, dropping repeated identifiers (first occurrence wins).
    pub fn new(generation: u64, fetched_at: DateTime<Utc>, topics: Vec<Topic>) -> Self {
        let mut seen: HashSet<String> = HashSet::with_capacity(topics.len());
        let mut kept = Vec::with_capacity(topics.len());
        for t in topics {
            if seen.insert(t.id.clone()) {
                kept.push(t);
            }
        }
        Self {
            generation,
            fetched_at: Some(fetched_at),
            topics: kept,
        }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// True for the sentinel installed before the first successful fetch.
    pub fn is_loaded(&self) -> bool {
        self.fetched_at.is_some()
    }

    pub fn find(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let snap = Snapshot::new(
            1,
            Utc::now(),
            vec![
                Topic::new("a", "first", 1),
                Topic::new("b", "other", 2),
                Topic::new("a", "second", 3),
            ],
        );
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.find("a").map(|t| t.title.as_str()), Some("first"));
    }

    #[test]
    fn empty_sentinel_is_not_loaded() {
        let snap = Snapshot::empty();
        assert_eq!(snap.generation, 0);
        assert!(!snap.is_loaded());
        assert!(snap.find("x").is_none());
    }

    #[test]
    fn views_fall_back_to_zero() {
        let t = Topic::new("a", "A", 0).with_meta(META_VIEWS, "not-a-number");
        assert_eq!(t.views(), 0);
        let t = Topic::new("a", "A", 0).with_meta(META_VIEWS, "1200");
        assert_eq!(t.views(), 1200);
    }
}
