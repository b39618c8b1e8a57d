use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::models::{message::ChannelEvent, validation::validate_channel_matcher};

/// A unit that reacts to one decoded broker event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &ChannelEvent) -> Result<(), Error>;
}

/// Either a literal channel name or a pattern where a `*` segment matches
/// exactly one dot-delimited segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMatcher {
    Exact(String),
    Pattern(Vec<String>),
}

impl ChannelMatcher {
    pub fn parse(matcher: &str) -> Result<Self, Error> {
        validate_channel_matcher(matcher)?;

        let segments: Vec<String> = matcher.split('.').map(String::from).collect();
        if segments.iter().any(|segment| segment == "*") {
            Ok(ChannelMatcher::Pattern(segments))
        } else {
            Ok(ChannelMatcher::Exact(matcher.to_string()))
        }
    }

    pub fn matches(&self, channel: &str) -> bool {
        match self {
            ChannelMatcher::Exact(name) => name == channel,
            ChannelMatcher::Pattern(segments) => pattern_matches(segments, channel),
        }
    }
}

impl fmt::Display for ChannelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMatcher::Exact(name) => f.write_str(name),
            ChannelMatcher::Pattern(segments) => f.write_str(&segments.join(".")),
        }
    }
}

/// `true` iff `channel` has as many non-empty segments as `pattern` and
/// every non-`*` segment is equal.
pub fn matches(pattern: &str, channel: &str) -> bool {
    let segments: Vec<&str> = pattern.split('.').collect();
    pattern_matches(&segments, channel)
}

fn pattern_matches<S: AsRef<str>>(segments: &[S], channel: &str) -> bool {
    let mut parts = channel.split('.');

    for segment in segments {
        match parts.next() {
            Some(part) if !part.is_empty() && (segment.as_ref() == "*" || segment.as_ref() == part) => {}
            _ => return false,
        }
    }

    parts.next().is_none()
}

/// Channel → handler bindings, populated once at startup.
///
/// Resolution: an exact binding wins; otherwise the first registered
/// wildcard pattern that matches.
#[derive(Default)]
pub struct HandlerRegistry {
    exact: HashMap<String, Arc<dyn EventHandler>>,
    patterns: Vec<(ChannelMatcher, Arc<dyn EventHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, matcher: &str, handler: Arc<dyn EventHandler>) -> Result<(), Error> {
        match ChannelMatcher::parse(matcher)? {
            ChannelMatcher::Exact(name) => {
                if let Some(existing) = self.exact.get(&name) {
                    warn!(
                        channel = %name,
                        kept = existing.name(),
                        ignored = handler.name(),
                        "Duplicate exact binding, keeping the first"
                    );
                    return Ok(());
                }
                debug!(channel = %name, handler = handler.name(), "Registered exact binding");
                self.exact.insert(name, handler);
            }
            pattern => {
                debug!(pattern = %pattern, handler = handler.name(), "Registered wildcard binding");
                self.patterns.push((pattern, handler));
            }
        }

        Ok(())
    }

    pub fn resolve(&self, channel: &str) -> Option<Arc<dyn EventHandler>> {
        if let Some(handler) = self.exact.get(channel) {
            return Some(Arc::clone(handler));
        }

        self.patterns
            .iter()
            .find(|(matcher, _)| matcher.matches(channel))
            .map(|(_, handler)| Arc::clone(handler))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut exact: Vec<(&String, &str)> = self
            .exact
            .iter()
            .map(|(channel, handler)| (channel, handler.name()))
            .collect();
        exact.sort();

        let patterns: Vec<(String, &str)> = self
            .patterns
            .iter()
            .map(|(matcher, handler)| (matcher.to_string(), handler.name()))
            .collect();

        f.debug_struct("HandlerRegistry")
            .field("exact", &exact)
            .field("patterns", &patterns)
            .finish()
    }
}
