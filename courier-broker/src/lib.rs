mod errors;
pub mod in_memory;
mod types;

pub use errors::BrokerError;
pub use types::{InboundMessage, SubscriptionBinding};

use async_trait::async_trait;
use courier_models::{BackoffPolicy, SendableError};
use futures_util::future::BoxFuture;
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

/// Callback installed by a subscription. Invoked once per delivery attempt; an `Err`
/// tells the backend to apply its redelivery policy.
pub type MessageCallback =
    Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, Result<(), SendableError>> + Send + Sync>;

/// Capability every message backend provides for a single topic.
#[async_trait]
pub trait Topic: Send + Sync + 'static {
    /// Backend-side name of the topic.
    fn name(&self) -> &str;

    /// Publish a message, returning the backend-assigned message id.
    async fn publish(
        &self,
        attributes: HashMap<String, String>,
        data: Vec<u8>,
    ) -> Result<String, BrokerError>;

    /// Start delivering messages for `binding` to `callback`.
    fn subscribe(
        &self,
        binding: &SubscriptionBinding,
        policy: &BackoffPolicy,
        callback: MessageCallback,
    ) -> Result<(), BrokerError>;
}

/// The closed set of backend implementations a topic can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    InMemory,
    Gcp,
    Nsq,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::InMemory => "in-memory",
            BackendKind::Gcp => "gcp",
            BackendKind::Nsq => "nsq",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "in-memory" => Ok(BackendKind::InMemory),
            "gcp" => Ok(BackendKind::Gcp),
            "nsq" => Ok(BackendKind::Nsq),
            other => Err(BrokerError::Internal(format!(
                "unknown broker backend '{other}'"
            ))),
        }
    }
}
