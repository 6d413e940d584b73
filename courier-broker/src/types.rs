use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One delivery attempt of a message, as handed to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub publish_time: DateTime<Utc>,
    /// 1-based, incremented by the backend on every redelivery.
    pub delivery_attempt: u32,
    pub attributes: HashMap<String, String>,
    pub data: Vec<u8>,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, attributes: HashMap<String, String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            publish_time: Utc::now(),
            delivery_attempt: 1,
            attributes,
            data,
        }
    }

    pub fn redelivery(&self) -> Self {
        Self {
            delivery_attempt: self.delivery_attempt.saturating_add(1),
            ..self.clone()
        }
    }
}

/// Identifies a subscription to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionBinding {
    pub topic: String,
    pub subscription: String,
    /// Name used on the backend side, defaults to `subscription`.
    pub provider_name: String,
}

impl SubscriptionBinding {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        let subscription = subscription.into();
        Self {
            topic: topic.into(),
            provider_name: subscription.clone(),
            subscription,
        }
    }

    pub fn with_provider_name(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = provider_name.into();
        self
    }
}
