mod config;
mod request_log;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::TimeDelta;
use config::parse_config;
use courier_broker::{BackendKind, BrokerError, Topic as BackendTopic, in_memory::InMemoryTopic};
use courier_config::{RuntimeConfig, SubscriptionDeclaration, TopicDeclaration, load_config};
use courier_models::{ErrorCode, MaxRetries, RetryPolicy, RuntimeError, SendableError};
use courier_pubsub::{
    JsonCodec, Manager, Request, ShutdownOutcome, Subscription, SubscriptionConfig, Topic,
};
use courier_utilities::startup;
use log::{error, info, warn};
use request_log::LoggingRequestTracker;
use serde::{Deserialize, Serialize};

const ORDERS_TOPIC: &str = "orders";
const SHIP_ORDER_SUBSCRIPTION: &str = "ship-order";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u64,
    region: String,
}

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = parse_config()?;
    startup::startup("Courier", config.log_level, config.log_file.as_deref())?;

    let runtime_config = build_runtime_config(&config)?;
    let manager = Manager::new(Arc::new(runtime_config), Arc::new(LoggingRequestTracker));

    let backend = build_backend(config.backend, &manager)?;
    let topic = Topic::new(
        &manager,
        ORDERS_TOPIC,
        JsonCodec::<OrderPlaced>::with_attributes(["region"]),
        backend,
    )?;
    let _subscription = Subscription::new(
        &topic,
        SHIP_ORDER_SUBSCRIPTION,
        SubscriptionConfig::new(ship_order),
    )?;

    let publisher = {
        let topic = topic.clone();
        let count = config.messages;
        let interval = Duration::from_millis(config.publish_interval_ms);
        tokio::spawn(async move { publish_orders(topic, count, interval).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining deliveries...");
    publisher.abort();

    let timeout = Duration::from_secs(config.shutdown_timeout_seconds);
    match manager.shutdown_with_timeout(timeout).await {
        ShutdownOutcome::Drained => info!("Shutdown complete"),
        ShutdownOutcome::DeadlineExceeded => warn!(
            "Shutdown timed out after {:?} with {} deliveries still running",
            timeout,
            manager.outstanding().active()
        ),
    }

    Ok(())
}

fn build_runtime_config(config: &config::Config) -> Result<RuntimeConfig, SendableError> {
    let mut runtime_config = match &config.runtime_config {
        Some(path) => load_config(path)?,
        None => demo_runtime_config(),
    };
    runtime_config.testing |= config.testing;
    Ok(runtime_config)
}

fn demo_runtime_config() -> RuntimeConfig {
    let subscription = SubscriptionDeclaration {
        service: "shipping".to_string(),
        retry_policy: Some(RetryPolicy {
            max_retries: Some(MaxRetries::Limited(3)),
            min_backoff: TimeDelta::try_seconds(1),
            max_backoff: TimeDelta::try_seconds(8),
        }),
        ..SubscriptionDeclaration::default()
    };
    let topic = TopicDeclaration {
        subscriptions: BTreeMap::from([(SHIP_ORDER_SUBSCRIPTION.to_string(), subscription)]),
    };

    RuntimeConfig {
        tracing_enabled: true,
        topics: BTreeMap::from([(ORDERS_TOPIC.to_string(), topic)]),
        ..RuntimeConfig::default()
    }
}

fn build_backend(
    kind: BackendKind,
    manager: &Manager,
) -> Result<Arc<dyn BackendTopic>, SendableError> {
    match kind {
        BackendKind::InMemory => Ok(Arc::new(InMemoryTopic::new(
            ORDERS_TOPIC,
            manager.cancellation_token(),
        ))),
        BackendKind::Gcp | BackendKind::Nsq => {
            Err(Box::new(BrokerError::NotImplemented(kind.as_str())))
        }
    }
}

async fn ship_order(request: Arc<Request>, order: OrderPlaced) -> Result<(), SendableError> {
    let attempt = request.message.attempt;
    if order.order_id % 5 == 0 && attempt == 1 {
        return Err(Box::new(RuntimeError::new(
            ErrorCode::Unavailable,
            format!("carrier unavailable for order {}", order.order_id),
        )));
    }

    info!(
        "[{}] Shipping order {} to {} (msg_id={}, attempt={})",
        request.log_context, order.order_id, order.region, request.message.message_id, attempt
    );
    Ok(())
}

async fn publish_orders(topic: Topic<OrderPlaced>, count: u64, interval: Duration) {
    const REGIONS: [&str; 3] = ["eu-west", "us-east", "ap-south"];

    for order_id in 1..=count {
        let order = OrderPlaced {
            order_id,
            region: REGIONS[(order_id % REGIONS.len() as u64) as usize].to_string(),
        };
        match topic.publish(&order).await {
            Ok(id) => info!("Published order {} as message {}", order_id, id),
            Err(err) => {
                error!("Failed to publish order {}: {}", order_id, err);
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }
}
