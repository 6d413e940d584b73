use std::{future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use courier_broker::{BrokerError, SubscriptionBinding};
use courier_config::RuntimeConfig;
use courier_models::{BackoffPolicy, ErrorCode, RetryPolicy, RuntimeError, SendableError};
use log::{error, info};

use crate::{names::validate_name, pipeline::DeliveryPipeline, request::Request, topic::Topic};

/// Processes messages delivered to a subscription.
///
/// Handlers run concurrently with themselves, one invocation per delivery attempt.
/// Returning an error (or panicking) makes the backend redeliver the message
/// according to the subscription's retry policy.
#[async_trait]
pub trait SubscriptionHandler<T>: Send + Sync + 'static {
    async fn handle(&self, request: Arc<Request>, message: T) -> Result<(), SendableError>;
}

#[async_trait]
impl<T, F, Fut> SubscriptionHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Arc<Request>, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SendableError>> + Send + 'static,
{
    async fn handle(&self, request: Arc<Request>, message: T) -> Result<(), SendableError> {
        (self)(request, message).await
    }
}

pub struct SubscriptionConfig<T> {
    pub handler: Arc<dyn SubscriptionHandler<T>>,
    /// Takes precedence over a retry policy declared in the runtime config.
    pub retry_policy: Option<RetryPolicy>,
}

impl<T> SubscriptionConfig<T> {
    pub fn new(handler: impl SubscriptionHandler<T>) -> Self {
        Self {
            handler: Arc::new(handler),
            retry_policy: None,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }
}

/// Static configuration of a subscription, either declared or synthesized under test.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSubscriptionConfig {
    pub service: String,
    pub trace_idx: i32,
    pub provider_name: String,
    pub retry_policy: Option<RetryPolicy>,
}

/// A live subscription. Messages keep being delivered for the rest of the process
/// lifetime; there is no way to unsubscribe.
#[derive(Debug)]
pub struct Subscription<T> {
    name: String,
    topic: String,
    service: String,
    retry_policy: BackoffPolicy,
    _payload: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Declares a subscription named `name` on `topic` and starts delivering its
    /// messages to `config.handler`.
    ///
    /// Call this once per subscription while the process initializes. Errors are
    /// configuration mistakes and are not meant to be recovered from.
    ///
    /// Once deployed, never rename the subscription or its topic: messages in flight
    /// for the old name would be lost.
    pub fn new(
        topic: &Topic<T>,
        name: impl Into<String>,
        config: SubscriptionConfig<T>,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        validate_name("subscription", &name)?;

        let manager = topic.manager();
        let static_config = resolve_static_config(manager.config(), topic.name(), &name)?;

        let retry_policy = config
            .retry_policy
            .as_ref()
            .or(static_config.retry_policy.as_ref())
            .cloned()
            .unwrap_or_default()
            .resolve()
            .map_err(|err| {
                RuntimeError::new(
                    err.code(),
                    format!(
                        "invalid retry policy for subscription {} on topic {}: {}",
                        name,
                        topic.name(),
                        err.message()
                    ),
                )
            })?;

        let pipeline = Arc::new(DeliveryPipeline {
            topic: topic.name().to_string(),
            subscription: name.clone(),
            service: static_config.service.clone(),
            trace_idx: static_config.trace_idx,
            traced: manager.tracing_enabled(),
            testing: manager.config().testing,
            codec: Arc::clone(topic.codec()),
            handler: config.handler,
            outstanding: Arc::clone(manager.outstanding()),
            request_tracker: Arc::clone(manager.request_tracker()),
        });

        let binding = SubscriptionBinding::new(topic.name(), name.clone())
            .with_provider_name(static_config.provider_name.clone());
        topic
            .backend()
            .subscribe(&binding, &retry_policy, pipeline.into_callback())
            .map_err(|err| {
                let code = match err {
                    BrokerError::Duplicate(_) => ErrorCode::AlreadyExists,
                    BrokerError::Closed(_) => ErrorCode::Unavailable,
                    _ => ErrorCode::Internal,
                };
                RuntimeError::new(
                    code,
                    format!("failed to subscribe {} to topic {}", name, topic.name()),
                )
                .with_cause(err)
            })?;

        if !manager.config().testing {
            info!(
                "Registered subscription {} on topic {} (service {}, max retries {}, backoff {:?}..{:?})",
                name,
                topic.name(),
                static_config.service,
                retry_policy.max_retries(),
                retry_policy.min_backoff(),
                retry_policy.max_backoff()
            );
        }

        Ok(Self {
            name,
            topic: topic.name().to_string(),
            service: static_config.service,
            retry_policy,
            _payload: PhantomData,
        })
    }
}

impl<T> Subscription<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn retry_policy(&self) -> &BackoffPolicy {
        &self.retry_policy
    }
}

/// Looks up the declared configuration of `name` on `topic`. Under test nothing is
/// declared, so a stand-in owned by the test service is returned instead.
pub fn resolve_static_config(
    config: &RuntimeConfig,
    topic: &str,
    name: &str,
) -> Result<StaticSubscriptionConfig, RuntimeError> {
    if config.testing {
        return Ok(StaticSubscriptionConfig {
            service: config.test_service.clone(),
            trace_idx: 0,
            provider_name: name.to_string(),
            retry_policy: None,
        });
    }

    let Some(declaration) = config.subscription(topic, name) else {
        error!("Unregistered/unknown subscription on topic {}: {}", topic, name);
        return Err(RuntimeError::new(
            ErrorCode::NotFound,
            format!("unregistered/unknown subscription on topic {topic}: {name}"),
        ));
    };

    Ok(StaticSubscriptionConfig {
        service: declaration.service.clone(),
        trace_idx: declaration.trace_idx,
        provider_name: declaration
            .provider_name
            .clone()
            .unwrap_or_else(|| name.to_string()),
        retry_policy: declaration.retry_policy.clone(),
    })
}
