//! Bus error model.

use thiserror::Error;

use crate::transport::TransportError;

/// Result type used across the bus.
pub type BusResult<T> = Result<T, BusError>;

/// Bus operation error.
///
/// - **Configuration** errors (`MissingLocalEndpoint`, `MissingContract`) are raised
///   before anything is dispatched.
/// - **Subscription** errors (`DuplicateSubscription`, `NoSubscriptionFound`) fail the
///   single operation, never the bus.
/// - **Handler** failures carry whatever the handler returned.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("no local endpoint address configured")]
    MissingLocalEndpoint,

    #[error("no contract mapping for message type '{0}'")]
    MissingContract(String),

    #[error("a handler is already subscribed to command type '{0}'")]
    DuplicateSubscription(String),

    #[error("no subscription found for command type '{0}'")]
    NoSubscriptionFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid endpoint address '{0}'")]
    InvalidAddress(String),

    #[error("header '{0}' not found")]
    HeaderNotFound(String),

    #[error("header '{key}' does not hold a {expected}")]
    HeaderType { key: String, expected: &'static str },

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("subscription store failure: {0}")]
    SubscriptionStore(String),

    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("bus already started")]
    AlreadyStarted,

    #[error("bus is stopped")]
    Stopped,
}

impl BusError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn header_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::HeaderType {
            key: key.into(),
            expected,
        }
    }
}
