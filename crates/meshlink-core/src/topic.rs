//! Topic filters and the subscription set.
//!
//! Topics and filters are `/`-separated segment lists. Filters may contain
//! two wildcards:
//!
//! - `+` matches exactly one topic segment, whatever it is
//! - `#` matches everything remaining in the topic once the walk reaches it,
//!   wherever it sits in the filter (`a/#/b` matches `a/x/y/z`)
//!
//! The second rule is deliberately looser than MQTT, which only allows `#` as
//! the last segment.

use std::collections::BTreeSet;

/// Segment separator.
pub const TOPIC_SEPARATOR: char = '/';

/// Single-level wildcard segment.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Multi-level wildcard segment.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Whether `topic` matches `filter`.
///
/// Walks both segment lists pairwise. A literal mismatch fails, `+` consumes
/// one segment, `#` accepts the rest. Without a `#`, both lists must run out
/// together.
pub fn matches(topic: &str, filter: &str) -> bool {
    let mut topic_segments = topic.split(TOPIC_SEPARATOR);

    for filter_segment in filter.split(TOPIC_SEPARATOR) {
        if filter_segment == MULTI_LEVEL_WILDCARD {
            return true;
        }

        let Some(topic_segment) = topic_segments.next() else {
            return false;
        };

        if filter_segment != SINGLE_LEVEL_WILDCARD && filter_segment != topic_segment {
            return false;
        }
    }

    topic_segments.next().is_none()
}

/// Whether `topic` is usable as a concrete publish topic (non-empty, no
/// wildcard segments).
pub fn is_publishable(topic: &str) -> bool {
    !topic.is_empty()
        && topic
            .split(TOPIC_SEPARATOR)
            .all(|segment| segment != SINGLE_LEVEL_WILDCARD && segment != MULTI_LEVEL_WILDCARD)
}

/// Deduplicated set of subscription filters.
///
/// Pure membership; subscribing has no wire effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    filters: BTreeSet<String>,
}

impl SubscriptionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Returns `false` if it was already present.
    pub fn insert(&mut self, filter: impl Into<String>) -> bool {
        self.filters.insert(filter.into())
    }

    /// Remove a filter. Removing an absent filter is a no-op returning `false`.
    pub fn remove(&mut self, filter: &str) -> bool {
        self.filters.remove(filter)
    }

    /// Whether `filter` is present.
    pub fn contains(&self, filter: &str) -> bool {
        self.filters.contains(filter)
    }

    /// Whether any filter matches `topic`.
    pub fn matches_any(&self, topic: &str) -> bool {
        self.filters.iter().any(|filter| matches(topic, filter))
    }

    /// All filters, in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(String::as_str)
    }

    /// Number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
