use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_models::SendableError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    PubSubMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessageData {
    pub topic: String,
    pub subscription: String,
    pub message_id: String,
    pub attempt: u32,
    pub published: DateTime<Utc>,
}

/// Request context for a single delivery attempt.
///
/// Subscriptions are never an authenticated end-user call, so no identity or
/// parent span is carried.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    pub service: String,
    pub message: PubSubMessageData,
    /// Raw payload the handler was invoked with.
    pub inputs: Vec<Vec<u8>>,
    /// Index of the handler definition in the trace metadata.
    pub def_loc: i32,
    pub traced: bool,
    /// `service=.. topic=.. subscription=..` prefix used by the delivery logs, for
    /// handlers that want to log with the same context.
    pub log_context: String,
}

/// Hooks into request bookkeeping and tracing. All methods default to no-ops.
pub trait RequestTracker: Send + Sync + 'static {
    fn begin_operation(&self) {}

    fn finish_operation(&self) {}

    /// Called before the handler runs. Returning a span is only expected when
    /// `request.traced` is set.
    fn begin_request(&self, _request: &Arc<Request>) -> Option<Box<dyn TraceSpan>> {
        None
    }

    fn finish_request(&self, _request: &Request) {}
}

/// A trace span opened for one delivery attempt.
pub trait TraceSpan: Send {
    /// Closes the span with the outcome reported to the backend.
    fn finish(self: Box<Self>, outcome: Result<(), &SendableError>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestTracker;

impl RequestTracker for NoopRequestTracker {}
