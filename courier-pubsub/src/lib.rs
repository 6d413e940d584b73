//! Backend-agnostic publish/subscribe runtime.
//!
//! A [`Manager`] owns the state shared by all subscriptions. [`Topic`]s bind a payload
//! type and codec to a backend, and [`Subscription`]s install a delivery pipeline on
//! the backend that decodes each message, runs the handler with panic containment and
//! counts the delivery as outstanding until it finishes, so [`Manager::shutdown`] can
//! wait for in-flight work to drain.

pub mod codec;
pub mod manager;
mod names;
pub mod outstanding;
mod pipeline;
pub mod request;
pub mod subscription;
pub mod topic;

pub use codec::{CodecError, EncodedMessage, JsonCodec, MessageCodec};
pub use manager::{Manager, ManagerState, ShutdownOutcome};
pub use outstanding::{DeliveryGuard, OutstandingTracker};
pub use pipeline::HandlerPanic;
pub use request::{
    NoopRequestTracker, PubSubMessageData, Request, RequestKind, RequestTracker, TraceSpan,
};
pub use subscription::{
    StaticSubscriptionConfig, Subscription, SubscriptionConfig, SubscriptionHandler,
    resolve_static_config,
};
pub use topic::Topic;
