use std::sync::Arc;

use courier_broker::{BrokerError, Topic as BackendTopic};
use courier_models::{ErrorCode, RuntimeError};
use log::error;

use crate::{
    codec::MessageCodec,
    manager::Manager,
    names::validate_name,
};

/// A named channel carrying messages of type `T`, bound to a backend.
///
/// The only way to obtain a `Topic` is [`Topic::new`], which validates the name and
/// checks the topic is declared in the runtime configuration.
pub struct Topic<T> {
    name: String,
    manager: Arc<Manager>,
    codec: Arc<dyn MessageCodec<T>>,
    backend: Arc<dyn BackendTopic>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            manager: Arc::clone(&self.manager),
            codec: Arc::clone(&self.codec),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<T: Send + 'static> Topic<T> {
    pub fn new(
        manager: &Arc<Manager>,
        name: impl Into<String>,
        codec: impl MessageCodec<T>,
        backend: Arc<dyn BackendTopic>,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        validate_name("topic", &name)?;

        if backend.name() != name {
            return Err(RuntimeError::invalid_argument(format!(
                "topic {} is bound to backend topic {}",
                name,
                backend.name()
            )));
        }

        if !manager.config().testing && manager.config().topic(&name).is_none() {
            error!("Unregistered/unknown topic: {}", name);
            return Err(RuntimeError::new(
                ErrorCode::NotFound,
                format!("unregistered/unknown topic {name}"),
            ));
        }

        Ok(Self {
            name,
            manager: Arc::clone(manager),
            codec: Arc::new(codec),
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encodes and publishes `message`, returning the backend-assigned id.
    pub async fn publish(&self, message: &T) -> Result<String, RuntimeError> {
        let encoded = self.codec.encode(message).map_err(|err| {
            RuntimeError::invalid_argument("failed to marshal message").with_cause(err)
        })?;

        let id = self
            .backend
            .publish(encoded.attributes, encoded.data)
            .await
            .map_err(|err| {
                let code = match err {
                    BrokerError::Closed(_) => ErrorCode::Unavailable,
                    _ => ErrorCode::Internal,
                };
                RuntimeError::new(code, format!("failed to publish to topic {}", self.name))
                    .with_cause(err)
            })?;

        self.manager.record_publish();
        Ok(id)
    }

    pub(crate) fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub(crate) fn codec(&self) -> &Arc<dyn MessageCodec<T>> {
        &self.codec
    }

    pub(crate) fn backend(&self) -> &Arc<dyn BackendTopic> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::JsonCodec, request::NoopRequestTracker};
    use courier_broker::in_memory::InMemoryTopic;
    use courier_config::{RuntimeConfig, parse_config};

    fn manager(config: RuntimeConfig) -> Arc<Manager> {
        Manager::new(Arc::new(config), Arc::new(NoopRequestTracker))
    }

    fn create(
        manager: &Arc<Manager>,
        name: &str,
        backend_name: &str,
    ) -> Result<Topic<u64>, RuntimeError> {
        let backend = Arc::new(InMemoryTopic::new(backend_name, manager.cancellation_token()));
        Topic::new(manager, name, JsonCodec::new(), backend)
    }

    #[test]
    fn requires_declaration_outside_testing() {
        let manager = manager(parse_config(r#"{ "topics": { "orders": {} } }"#).unwrap());

        let err = create(&manager, "payments", "payments").err().unwrap();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let topic = create(&manager, "orders", "orders").unwrap();
        assert_eq!(topic.name(), "orders");
    }

    #[test]
    fn rejects_bad_names_and_mismatched_backends() {
        let manager = manager(RuntimeConfig::for_testing("svc"));

        let err = create(&manager, "Orders", "Orders").err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = create(&manager, "orders", "other").err().unwrap();
        assert!(err.message().contains("bound to backend topic other"));
    }

    #[tokio::test]
    async fn publish_counts_messages_and_reports_closed_backends() {
        let manager = manager(RuntimeConfig::for_testing("svc"));
        let topic = create(&manager, "orders", "orders").unwrap();

        topic.publish(&1).await.unwrap();
        topic.publish(&2).await.unwrap();
        assert_eq!(manager.published_count(), 2);

        manager.shutdown(std::future::ready(())).await;
        let err = topic.publish(&3).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert_eq!(manager.published_count(), 2);
    }
}
