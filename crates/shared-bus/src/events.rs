//! # Event Filters
//!
//! Dotted-pattern matching used by local subscriptions.
//!
//! - `order.created` matches exactly
//! - `order.*` matches one segment (`order.created`, not `order.line.added`)
//! - `order.**` matches one or more trailing segments
//! - `*` alone matches any single-segment pattern, `**` matches everything

use shared_types::LocalEvent;

/// Check whether `pattern` (a subscription) matches `topic` (an event pattern).
pub fn pattern_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "**" || pattern == topic {
        return true;
    }

    let mut expected = pattern.split('.');
    let mut actual = topic.split('.');

    loop {
        match (expected.next(), actual.next()) {
            (Some("**"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(e), Some(a)) if e == a => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Filter for selective subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Patterns to include. Empty means all events.
    pub patterns: Vec<String>,
    /// Sources to include. Empty means all sources.
    pub sources: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for one pattern.
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            patterns: vec![pattern.into()],
            sources: Vec::new(),
        }
    }

    /// Create a filter for several patterns.
    #[must_use]
    pub fn patterns(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            sources: Vec::new(),
        }
    }

    /// Restrict to events from the given sources.
    #[must_use]
    pub fn from_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &LocalEvent) -> bool {
        let pattern_match = self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, &event.pattern));

        let source_match = self.sources.is_empty()
            || event
                .source
                .as_ref()
                .is_some_and(|source| self.sources.contains(source));

        pattern_match && source_match
    }
}
