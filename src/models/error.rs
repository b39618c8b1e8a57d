use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result},
};

/// Per-message failure classes seen by the dispatcher.
///
/// Delivery failures never show up here: the push channel absorbs them.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    Decode {
        channel: String,
        reason: String,
    },
    Handler {
        channel: String,
        handler: String,
        reason: String,
    },
    Timeout {
        channel: String,
        handler: String,
        timeout_ms: u64,
    },
}

impl DispatchError {
    pub fn channel(&self) -> &str {
        match self {
            DispatchError::Decode { channel, .. }
            | DispatchError::Handler { channel, .. }
            | DispatchError::Timeout { channel, .. } => channel,
        }
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, DispatchError::Decode { .. })
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DispatchError::Decode { channel, reason } => {
                write!(f, "malformed payload on '{}': {}", channel, reason)
            }
            DispatchError::Handler {
                channel,
                handler,
                reason,
            } => write!(f, "handler '{}' failed on '{}': {}", handler, channel, reason),
            DispatchError::Timeout {
                channel,
                handler,
                timeout_ms,
            } => write!(
                f,
                "handler '{}' timed out after {}ms on '{}'",
                handler, timeout_ms, channel
            ),
        }
    }
}

impl StdError for DispatchError {}
