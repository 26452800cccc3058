//! JSON wire representation of envelopes.
//!
//! Headers carry explicit type tags (see [`HeaderValue`]) and the body carries the
//! fully-qualified message type next to its payload, so a receiver can rebuild the
//! concrete command or event type it registered.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::envelope::{Envelope, HeaderValue};
use crate::error::{BusError, BusResult};
use crate::message::{Message, SubscriptionMessage, type_name_of};

type Decoder = fn(JsonValue) -> Result<Arc<dyn Message>, serde_json::Error>;

#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    headers: HashMap<String, HeaderValue>,
    body: WireBody,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBody {
    #[serde(rename = "type")]
    message_type: String,
    payload: JsonValue,
}

/// Message type registry plus envelope (de)serialisation.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    decoders: HashMap<&'static str, Decoder>,
}

impl MessageCodec {
    /// A codec that already knows [`SubscriptionMessage`].
    pub fn new() -> Self {
        let mut codec = Self {
            decoders: HashMap::new(),
        };
        codec.register::<SubscriptionMessage>();
        codec
    }

    /// Make `M` decodable. Registering twice is harmless.
    pub fn register<M>(&mut self) -> &mut Self
    where
        M: Message + DeserializeOwned,
    {
        self.decoders.insert(type_name_of::<M>(), decode_as::<M>);
        self
    }

    pub fn knows(&self, message_type: &str) -> bool {
        self.decoders.contains_key(message_type)
    }

    pub fn encode(&self, envelope: &Envelope) -> BusResult<String> {
        let body = envelope.body();
        let wire = WireEnvelope {
            headers: envelope.headers().clone(),
            body: WireBody {
                message_type: body.message_type().to_string(),
                payload: body.to_payload()?,
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn decode(&self, text: &str) -> BusResult<Envelope> {
        let wire: WireEnvelope = serde_json::from_str(text)?;
        let decoder = self
            .decoders
            .get(wire.body.message_type.as_str())
            .ok_or_else(|| BusError::UnknownMessageType(wire.body.message_type.clone()))?;
        let body = decoder(wire.body.payload)?;
        Ok(Envelope::from_parts(wire.headers, body))
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_as<M>(payload: JsonValue) -> Result<Arc<dyn Message>, serde_json::Error>
where
    M: Message + DeserializeOwned,
{
    let message: M = serde_json::from_value(payload)?;
    Ok(Arc::new(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::EndpointAddress;
    use crate::message::{MessageIntent, downcast_message};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order: u64,
        sku: String,
    }

    crate::event!(OrderPlaced);

    fn addr(q: &str) -> EndpointAddress {
        EndpointAddress::new(q, "host").unwrap()
    }

    #[test]
    fn decodes_into_the_registered_type() {
        let mut codec = MessageCodec::new();
        codec.register::<OrderPlaced>();

        let env = Envelope::create(
            addr("a"),
            addr("b"),
            Arc::new(OrderPlaced {
                order: 9,
                sku: "X-1".into(),
            }),
        );
        let text = codec.encode(&env).unwrap();
        let back = codec.decode(&text).unwrap();

        assert_eq!(back.headers(), env.headers());
        assert_eq!(back.intent(), MessageIntent::Event);
        let body = downcast_message::<OrderPlaced>(back.body().clone()).unwrap();
        assert_eq!(body.order, 9);
        assert_eq!(body.sku, "X-1");
    }

    #[test]
    fn wire_form_tags_headers_and_body() {
        let codec = MessageCodec::new();
        let env = Envelope::create(
            addr("a"),
            addr("b"),
            Arc::new(SubscriptionMessage::new(addr("a"), "some::Event")),
        );
        let json: JsonValue = serde_json::from_str(&codec.encode(&env).unwrap()).unwrap();

        assert_eq!(json["headers"]["Sender"]["type"], "Address");
        assert_eq!(json["headers"]["Sender"]["value"], "a@host");
        assert_eq!(json["body"]["type"], type_name_of::<SubscriptionMessage>());
    }

    #[test]
    fn unknown_body_type_is_rejected() {
        let sender = MessageCodec::new();
        let mut sender_with_type = sender.clone();
        sender_with_type.register::<OrderPlaced>();

        let env = Envelope::create(
            addr("a"),
            addr("b"),
            Arc::new(OrderPlaced {
                order: 1,
                sku: "Y".into(),
            }),
        );
        let text = sender_with_type.encode(&env).unwrap();

        assert!(matches!(
            sender.decode(&text),
            Err(BusError::UnknownMessageType(_))
        ));
    }
}
