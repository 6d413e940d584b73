use std::{collections::HashMap, marker::PhantomData};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("attribute field {0} must be a string")]
    NonStringAttribute(String),
    #[error("payload must be a JSON object to carry attribute fields")]
    NotAnObject,
}

/// A message body and its attributes, ready to hand to a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedMessage {
    pub attributes: HashMap<String, String>,
    pub data: Vec<u8>,
}

/// Converts a topic's payload type to and from its wire representation.
pub trait MessageCodec<T>: Send + Sync + 'static {
    fn encode(&self, message: &T) -> Result<EncodedMessage, CodecError>;

    fn decode(&self, data: &[u8], attributes: &HashMap<String, String>) -> Result<T, CodecError>;
}

/// JSON body codec. Fields named in `attribute_fields` travel as message attributes
/// instead of in the body.
pub struct JsonCodec<T> {
    attribute_fields: Vec<String>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            attribute_fields: Vec::new(),
            _payload: PhantomData,
        }
    }

    pub fn with_attributes<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attribute_fields: fields.into_iter().map(Into::into).collect(),
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageCodec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, message: &T) -> Result<EncodedMessage, CodecError> {
        if self.attribute_fields.is_empty() {
            return Ok(EncodedMessage {
                attributes: HashMap::new(),
                data: serde_json::to_vec(message)?,
            });
        }

        let mut object = match serde_json::to_value(message)? {
            Value::Object(object) => object,
            _ => return Err(CodecError::NotAnObject),
        };

        let mut attributes = HashMap::new();
        for field in &self.attribute_fields {
            match object.remove(field) {
                Some(Value::String(value)) => {
                    attributes.insert(field.clone(), value);
                }
                Some(Value::Null) | None => {}
                Some(_) => return Err(CodecError::NonStringAttribute(field.clone())),
            }
        }

        Ok(EncodedMessage {
            attributes,
            data: serde_json::to_vec(&object)?,
        })
    }

    fn decode(&self, data: &[u8], attributes: &HashMap<String, String>) -> Result<T, CodecError> {
        if self.attribute_fields.is_empty() {
            return Ok(serde_json::from_slice(data)?);
        }

        let mut object: Map<String, Value> = match serde_json::from_slice(data)? {
            Value::Object(object) => object,
            _ => return Err(CodecError::NotAnObject),
        };
        for field in &self.attribute_fields {
            if let Some(value) = attributes.get(field) {
                object.insert(field.clone(), Value::String(value.clone()));
            }
        }

        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: u64,
        region: String,
        #[serde(default)]
        note: Option<String>,
    }

    #[test]
    fn lifts_attribute_fields_out_of_the_body() {
        let codec = JsonCodec::<OrderPlaced>::with_attributes(["region"]);
        let encoded = codec
            .encode(&OrderPlaced {
                order_id: 7,
                region: "eu-west".into(),
                note: None,
            })
            .unwrap();

        assert_eq!(encoded.attributes.get("region").map(String::as_str), Some("eu-west"));
        let body: Value = serde_json::from_slice(&encoded.data).unwrap();
        assert!(body.get("region").is_none());
        assert_eq!(body["order_id"], 7);

        let decoded = codec.decode(&encoded.data, &encoded.attributes).unwrap();
        assert_eq!(decoded.region, "eu-west");
        assert_eq!(decoded.order_id, 7);
    }

    #[test]
    fn rejects_non_string_attribute_fields() {
        let codec = JsonCodec::<OrderPlaced>::with_attributes(["order_id"]);
        let err = codec
            .encode(&OrderPlaced {
                order_id: 1,
                region: "us".into(),
                note: None,
            })
            .unwrap_err();
        assert!(matches!(err, CodecError::NonStringAttribute(field) if field == "order_id"));
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let codec = JsonCodec::<OrderPlaced>::new();
        let err = codec.decode(b"{\"order_id\": ", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));

        let codec = JsonCodec::<OrderPlaced>::with_attributes(["region"]);
        let err = codec.decode(b"[1, 2]", &HashMap::new()).unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject));
    }
}
