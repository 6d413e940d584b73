use crate::{BrokerError, InboundMessage, MessageCallback, SubscriptionBinding, Topic};
use async_trait::async_trait;
use courier_models::BackoffPolicy;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
struct TopicState {
    subscriptions: HashMap<String, mpsc::UnboundedSender<InboundMessage>>,
    dead_letters: HashMap<String, Vec<InboundMessage>>,
}

/// Queue-style backend that keeps everything in process memory.
///
/// Every published message is fanned out to each subscription. Deliveries run
/// concurrently, failed attempts are redelivered after the policy's backoff, and
/// messages that exhaust their retries are parked in a per-subscription dead-letter
/// list. Once `shutdown` is cancelled no new deliveries or redeliveries start.
#[derive(Clone)]
pub struct InMemoryTopic {
    name: String,
    state: Arc<Mutex<TopicState>>,
    shutdown: CancellationToken,
}

impl InMemoryTopic {
    pub fn new(name: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
            shutdown,
        }
    }

    /// Messages that exhausted their retries on `subscription`.
    pub fn dead_letters(&self, subscription: &str) -> Vec<InboundMessage> {
        self.state
            .lock()
            .dead_letters
            .get(subscription)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Topic for InMemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        attributes: HashMap<String, String>,
        data: Vec<u8>,
    ) -> Result<String, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed(self.name.clone()));
        }

        let message = InboundMessage::new(Uuid::new_v4().to_string(), attributes, data);
        let guard = self.state.lock();
        for (subscription, sender) in &guard.subscriptions {
            if sender.send(message.clone()).is_err() {
                debug!(
                    "Subscription {} on {} is no longer dispatching; dropping message {}",
                    subscription, self.name, message.id
                );
            }
        }
        Ok(message.id)
    }

    fn subscribe(
        &self,
        binding: &SubscriptionBinding,
        policy: &BackoffPolicy,
        callback: MessageCallback,
    ) -> Result<(), BrokerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| BrokerError::Internal(err.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut guard = self.state.lock();
            if guard.subscriptions.contains_key(&binding.provider_name) {
                return Err(BrokerError::Duplicate(binding.provider_name.clone()));
            }
            guard
                .subscriptions
                .insert(binding.provider_name.clone(), sender);
        }

        let dispatcher = Arc::new(Dispatcher {
            topic: self.name.clone(),
            subscription: binding.provider_name.clone(),
            policy: *policy,
            callback,
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        });
        runtime.spawn(dispatcher.run(receiver));
        Ok(())
    }
}

struct Dispatcher {
    topic: String,
    subscription: String,
    policy: BackoffPolicy,
    callback: MessageCallback,
    state: Arc<Mutex<TopicState>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<InboundMessage>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(
                        "Subscription {} on {} stopped accepting messages",
                        self.subscription, self.topic
                    );
                    break;
                }
                message = receiver.recv() => match message {
                    Some(message) => {
                        tokio::spawn(Arc::clone(&self).deliver(message));
                    }
                    None => break,
                }
            }
        }
    }

    async fn deliver(self: Arc<Self>, mut message: InboundMessage) {
        loop {
            let attempt = message.delivery_attempt;
            let err = match (self.callback)(message.clone()).await {
                Ok(()) => {
                    debug!(
                        "Acknowledged message {} on {}/{} (attempt {})",
                        message.id, self.topic, self.subscription, attempt
                    );
                    return;
                }
                Err(err) => err,
            };

            if self.policy.is_exhausted(attempt) {
                warn!(
                    "Message {} on {}/{} failed {} attempts, moving to dead letters: {}",
                    message.id, self.topic, self.subscription, attempt, err
                );
                self.state
                    .lock()
                    .dead_letters
                    .entry(self.subscription.clone())
                    .or_default()
                    .push(message);
                return;
            }

            let delay = self.policy.next_delay(attempt);
            debug!(
                "Message {} on {}/{} failed attempt {}, redelivering in {:?}: {}",
                message.id, self.topic, self.subscription, attempt, delay, err
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(
                        "Abandoning redelivery of message {} on {}/{} due to shutdown",
                        message.id, self.topic, self.subscription
                    );
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            message = message.redelivery();
        }
    }
}
