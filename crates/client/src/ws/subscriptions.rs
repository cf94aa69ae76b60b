//! Refcounted topic registry.

use std::collections::BTreeMap;

/// Topic interest counted per subscriber.
///
/// Only 0→1 and 1→0 transitions are reported, so callers emit exactly one
/// wire-level subscribe/unsubscribe per topic lifetime.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    refcounts: BTreeMap<String, usize>,
}

impl SubscriptionRegistry {
    /// Add one subscriber. Returns `true` when the topic just became active.
    pub(crate) fn acquire(&mut self, topic: &str) -> bool {
        let count = self.refcounts.entry(topic.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop one subscriber. Returns `true` when the topic just became inactive.
    ///
    /// Releasing a topic nobody holds is a no-op.
    pub(crate) fn release(&mut self, topic: &str) -> bool {
        let Some(count) = self.refcounts.get_mut(topic) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.refcounts.remove(topic);
            true
        } else {
            false
        }
    }

    pub(crate) fn refcount(&self, topic: &str) -> usize {
        self.refcounts.get(topic).copied().unwrap_or(0)
    }

    /// Topics with at least one subscriber, in a stable order.
    pub(crate) fn active_topics(&self) -> impl Iterator<Item = &str> {
        self.refcounts.keys().map(String::as_str)
    }
}
