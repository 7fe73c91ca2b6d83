//! # Topic Store
//! Holds exactly one current [`Snapshot`] behind an atomic pointer.
//!
//! Reads are a pointer load and never wait on a writer. A publish is a
//! compare-and-swap loop, so the generation check and the install happen as
//! one step: a slow fetch that finishes after a newer one can never regress
//! what readers see.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::topic::Snapshot;

#[derive(Debug)]
pub struct TopicStore {
    current: ArcSwap<Snapshot>,
}

impl TopicStore {
    /// Empty store holding the "not yet loaded" sentinel.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    /// Install `snapshot` if its generation is newer than the current one.
    /// Returns whether it was installed.
    pub fn publish(&self, snapshot: Snapshot) -> bool {
        let next = Arc::new(snapshot);
        let prev = self.current.rcu(|cur| {
            if next.generation > cur.generation {
                Arc::clone(&next)
            } else {
                Arc::clone(cur)
            }
        });
        let installed = prev.generation < next.generation;
        if !installed {
            tracing::debug!(
                target: "store",
                current = prev.generation,
                rejected = next.generation,
                "stale snapshot rejected"
            );
        }
        installed
    }

    /// The currently published snapshot. Holding the returned `Arc` keeps that
    /// snapshot alive regardless of later publishes.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }
}

impl Default for TopicStore {
    fn default() -> Self {
        Self::new()
    }
}
