use std::fmt;
use std::str::FromStr;

use super::DispatchError;
use crate::outbox::aggregate_prefix;

/// Which event types a handler is registered for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// One event type, e.g. `lead.created`.
    Exact(String),
    /// Every event type whose first dot-segment equals the prefix, e.g. `lead.*`.
    Aggregate(String),
    /// Every event, `*`.
    Global,
}

/// Resolution class, in dispatch order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum PatternClass {
    Exact,
    Aggregate,
    Global,
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Result<Self, DispatchError> {
        let invalid = |reason: &str| DispatchError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if pattern == "*" {
            return Ok(EventPattern::Global);
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            if prefix.is_empty() || prefix.contains('.') || prefix.contains('*') {
                return Err(invalid("aggregate wildcard must look like `<aggregate>.*`"));
            }
            return Ok(EventPattern::Aggregate(prefix.to_string()));
        }
        if pattern.contains('*') {
            return Err(invalid("`*` is only allowed as `*` or a trailing `.*`"));
        }
        Ok(EventPattern::Exact(pattern.to_string()))
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventPattern::Exact(expected) => expected == event_type,
            EventPattern::Aggregate(prefix) => aggregate_prefix(event_type) == prefix,
            EventPattern::Global => true,
        }
    }

    pub(crate) fn class(&self) -> PatternClass {
        match self {
            EventPattern::Exact(_) => PatternClass::Exact,
            EventPattern::Aggregate(_) => PatternClass::Aggregate,
            EventPattern::Global => PatternClass::Global,
        }
    }
}

impl FromStr for EventPattern {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPattern::Exact(event_type) => f.write_str(event_type),
            EventPattern::Aggregate(prefix) => write!(f, "{prefix}.*"),
            EventPattern::Global => f.write_str("*"),
        }
    }
}
