//! Message envelopes.
//!
//! An [`Envelope`] is one message plus its headers. [`Envelope::create`] stamps the
//! standard routing headers; everything else is added by pipeline steps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jitney_core::{CorrelationId, MessageId};

use crate::address::EndpointAddress;
use crate::error::{BusError, BusResult};
use crate::message::{Message, MessageIntent};

/// Well-known header keys stamped by [`Envelope::create`].
pub mod headers {
    pub const SENDER: &str = "Sender";
    pub const RECIPIENT: &str = "Recipient";
    pub const TIME_SENT: &str = "TimeSent";
    pub const MESSAGE_ID: &str = "MessageId";
    pub const CORRELATION_ID: &str = "CorrelationId";
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const MESSAGE_INTENT: &str = "MessageIntent";
}

/// A header value with an explicit type discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum HeaderValue {
    Text(String),
    Id(Uuid),
    Timestamp(DateTime<Utc>),
    Address(EndpointAddress),
    Intent(MessageIntent),
}

/// Types that can be read back out of a [`HeaderValue`].
pub trait FromHeaderValue: Sized {
    /// Human-readable type name used in `HeaderType` errors.
    const EXPECTED: &'static str;

    fn from_header_value(value: &HeaderValue) -> Option<Self>;
}

impl FromHeaderValue for String {
    const EXPECTED: &'static str = "text";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        match value {
            HeaderValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromHeaderValue for Uuid {
    const EXPECTED: &'static str = "identifier";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        match value {
            HeaderValue::Id(id) => Some(*id),
            _ => None,
        }
    }
}

impl FromHeaderValue for MessageId {
    const EXPECTED: &'static str = "message id";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        Uuid::from_header_value(value).map(MessageId::from_uuid)
    }
}

impl FromHeaderValue for CorrelationId {
    const EXPECTED: &'static str = "correlation id";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        Uuid::from_header_value(value).map(CorrelationId::from_uuid)
    }
}

impl FromHeaderValue for DateTime<Utc> {
    const EXPECTED: &'static str = "timestamp";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        match value {
            HeaderValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl FromHeaderValue for EndpointAddress {
    const EXPECTED: &'static str = "endpoint address";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        match value {
            HeaderValue::Address(addr) => Some(addr.clone()),
            _ => None,
        }
    }
}

impl FromHeaderValue for MessageIntent {
    const EXPECTED: &'static str = "message intent";

    fn from_header_value(value: &HeaderValue) -> Option<Self> {
        match value {
            HeaderValue::Intent(intent) => Some(*intent),
            _ => None,
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<Uuid> for HeaderValue {
    fn from(value: Uuid) -> Self {
        HeaderValue::Id(value)
    }
}

impl From<MessageId> for HeaderValue {
    fn from(value: MessageId) -> Self {
        HeaderValue::Id(value.into())
    }
}

impl From<CorrelationId> for HeaderValue {
    fn from(value: CorrelationId) -> Self {
        HeaderValue::Id(value.into())
    }
}

impl From<DateTime<Utc>> for HeaderValue {
    fn from(value: DateTime<Utc>) -> Self {
        HeaderValue::Timestamp(value)
    }
}

impl From<EndpointAddress> for HeaderValue {
    fn from(value: EndpointAddress) -> Self {
        HeaderValue::Address(value)
    }
}

impl From<MessageIntent> for HeaderValue {
    fn from(value: MessageIntent) -> Self {
        HeaderValue::Intent(value)
    }
}

/// The wire unit: headers plus exactly one message body.
///
/// Envelopes are created per outgoing operation and dropped after delivery.
#[derive(Debug, Clone)]
pub struct Envelope {
    headers: HashMap<String, HeaderValue>,
    body: Arc<dyn Message>,
}

impl Envelope {
    /// Create an envelope that starts its own correlation chain.
    pub fn create(sender: EndpointAddress, recipient: EndpointAddress, body: Arc<dyn Message>) -> Self {
        Self::create_correlated(sender, recipient, body, None)
    }

    /// Create an envelope, inheriting `correlation_id` from a causing message when given.
    pub fn create_correlated(
        sender: EndpointAddress,
        recipient: EndpointAddress,
        body: Arc<dyn Message>,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        let message_id = MessageId::new();
        let correlation_id = correlation_id.unwrap_or_else(|| CorrelationId::from(message_id));

        let mut stamped: HashMap<String, HeaderValue> = HashMap::with_capacity(8);
        stamped.insert(headers::SENDER.to_string(), sender.into());
        stamped.insert(headers::RECIPIENT.to_string(), recipient.into());
        stamped.insert(headers::TIME_SENT.to_string(), Utc::now().into());
        stamped.insert(headers::MESSAGE_TYPE.to_string(), body.message_type().into());
        stamped.insert(headers::MESSAGE_INTENT.to_string(), body.intent().into());
        stamped.insert(headers::MESSAGE_ID.to_string(), message_id.into());
        stamped.insert(headers::CORRELATION_ID.to_string(), correlation_id.into());

        Self {
            headers: stamped,
            body,
        }
    }

    /// Reassemble an envelope received from the wire.
    pub fn from_parts(headers: HashMap<String, HeaderValue>, body: Arc<dyn Message>) -> Self {
        Self { headers, body }
    }

    pub fn headers(&self) -> &HashMap<String, HeaderValue> {
        &self.headers
    }

    pub fn body(&self) -> &Arc<dyn Message> {
        &self.body
    }

    pub fn contains_header(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Add the header if absent, replace it otherwise.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> BusResult<()> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(BusError::invalid_argument("header key cannot be empty"));
        }
        self.headers.insert(key, value.into());
        Ok(())
    }

    /// Typed header lookup.
    ///
    /// A missing key is `HeaderNotFound`; a value of another type is `HeaderType`.
    pub fn header<T: FromHeaderValue>(&self, key: &str) -> BusResult<T> {
        let value = self
            .headers
            .get(key)
            .ok_or_else(|| BusError::HeaderNotFound(key.to_string()))?;
        T::from_header_value(value).ok_or_else(|| BusError::header_type(key, T::EXPECTED))
    }

    pub fn sender(&self) -> BusResult<EndpointAddress> {
        self.header(headers::SENDER)
    }

    pub fn recipient(&self) -> BusResult<EndpointAddress> {
        self.header(headers::RECIPIENT)
    }

    pub fn time_sent(&self) -> BusResult<DateTime<Utc>> {
        self.header(headers::TIME_SENT)
    }

    pub fn message_id(&self) -> BusResult<MessageId> {
        self.header(headers::MESSAGE_ID)
    }

    pub fn correlation_id(&self) -> BusResult<CorrelationId> {
        self.header(headers::CORRELATION_ID)
    }

    pub fn message_type(&self) -> BusResult<String> {
        self.header(headers::MESSAGE_TYPE)
    }

    /// Intent from the header, falling back to the body's own capability.
    pub fn intent(&self) -> MessageIntent {
        self.header(headers::MESSAGE_INTENT)
            .unwrap_or_else(|_| self.body.intent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct ValueCommand {
        value: i32,
    }

    crate::command!(ValueCommand);

    fn addr(q: &str) -> EndpointAddress {
        EndpointAddress::new(q, "host").unwrap()
    }

    #[test]
    fn create_stamps_all_standard_headers() {
        let env = Envelope::create(addr("a"), addr("b"), Arc::new(ValueCommand { value: 1 }));

        for key in [
            headers::SENDER,
            headers::RECIPIENT,
            headers::TIME_SENT,
            headers::MESSAGE_ID,
            headers::CORRELATION_ID,
            headers::MESSAGE_TYPE,
            headers::MESSAGE_INTENT,
        ] {
            assert!(env.contains_header(key), "missing header {key}");
        }

        assert_eq!(env.sender().unwrap(), addr("a"));
        assert_eq!(env.recipient().unwrap(), addr("b"));
        assert_eq!(env.intent(), MessageIntent::Command);
        assert!(env.message_type().unwrap().ends_with("ValueCommand"));
    }

    #[test]
    fn correlation_defaults_to_message_id() {
        let env = Envelope::create(addr("a"), addr("b"), Arc::new(ValueCommand { value: 1 }));
        let message_id = env.message_id().unwrap();
        let correlation_id = env.correlation_id().unwrap();
        assert_eq!(message_id.as_uuid(), correlation_id.as_uuid());
    }

    #[test]
    fn inherited_correlation_is_kept() {
        let cause = CorrelationId::new();
        let env = Envelope::create_correlated(
            addr("a"),
            addr("b"),
            Arc::new(ValueCommand { value: 1 }),
            Some(cause),
        );
        assert_eq!(env.correlation_id().unwrap(), cause);
        assert_ne!(env.message_id().unwrap().as_uuid(), cause.as_uuid());
    }

    #[test]
    fn set_header_adds_or_replaces() {
        let mut env = Envelope::create(addr("a"), addr("b"), Arc::new(ValueCommand { value: 1 }));
        env.set_header("Tenant", "acme").unwrap();
        env.set_header("Tenant", "globex").unwrap();
        assert_eq!(env.header::<String>("Tenant").unwrap(), "globex");
        assert!(env.set_header(" ", "x").is_err());
    }

    #[test]
    fn lookup_errors_are_distinguished() {
        let env = Envelope::create(addr("a"), addr("b"), Arc::new(ValueCommand { value: 1 }));
        assert!(matches!(
            env.header::<String>("Nope"),
            Err(BusError::HeaderNotFound(_))
        ));
        assert!(matches!(
            env.header::<String>(headers::TIME_SENT),
            Err(BusError::HeaderType { .. })
        ));
    }
}
