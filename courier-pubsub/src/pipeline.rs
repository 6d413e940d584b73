use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use courier_broker::{InboundMessage, MessageCallback};
use courier_models::{RuntimeError, SendableError};
use futures_util::FutureExt;
use log::{error, warn};
use thiserror::Error;

use crate::{
    codec::MessageCodec,
    outstanding::OutstandingTracker,
    request::{PubSubMessageData, Request, RequestKind, RequestTracker, TraceSpan},
    subscription::SubscriptionHandler,
};

/// Cause attached to the error reported when a handler panics.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerPanic(pub String);

/// Per-subscription state needed to run one delivery attempt.
pub(crate) struct DeliveryPipeline<T> {
    pub(crate) topic: String,
    pub(crate) subscription: String,
    pub(crate) service: String,
    pub(crate) trace_idx: i32,
    pub(crate) traced: bool,
    pub(crate) testing: bool,
    pub(crate) codec: Arc<dyn MessageCodec<T>>,
    pub(crate) handler: Arc<dyn SubscriptionHandler<T>>,
    pub(crate) outstanding: Arc<OutstandingTracker>,
    pub(crate) request_tracker: Arc<dyn RequestTracker>,
}

impl<T: Send + 'static> DeliveryPipeline<T> {
    pub(crate) fn into_callback(self: Arc<Self>) -> MessageCallback {
        Arc::new(move |message: InboundMessage| Arc::clone(&self).deliver(message).boxed())
    }

    pub(crate) async fn deliver(
        self: Arc<Self>,
        message: InboundMessage,
    ) -> Result<(), SendableError> {
        let _delivery = self.outstanding.begin_delivery();
        // Under test the caller is already inside an operation.
        let _operation = (!self.testing).then(|| OperationScope::begin(&self.request_tracker));

        let payload = match self.codec.decode(&message.data, &message.attributes) {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    "[{}] failed to unmarshal message (msg_id={}, delivery_attempt={}): {}",
                    self.log_context(),
                    message.id,
                    message.delivery_attempt,
                    err
                );
                return Err(Box::new(
                    RuntimeError::internal("failed to unmarshal message").with_cause(err),
                ));
            }
        };

        let request = Arc::new(Request {
            kind: RequestKind::PubSubMessage,
            service: self.service.clone(),
            message: PubSubMessageData {
                topic: self.topic.clone(),
                subscription: self.subscription.clone(),
                message_id: message.id.clone(),
                attempt: message.delivery_attempt,
                published: message.publish_time,
            },
            inputs: vec![message.data],
            def_loc: self.trace_idx,
            traced: self.traced,
            log_context: self.log_context(),
        });

        let span = OpenSpan(self.request_tracker.begin_request(&request));
        let result = self.invoke(Arc::clone(&request), payload).await;
        span.finish(result.as_ref().map(|_| ()));
        self.request_tracker.finish_request(&request);

        if let Err(err) = &result {
            warn!(
                "[{}] subscriber failed (msg_id={}, delivery_attempt={}, code={}): {}",
                request.log_context,
                message.id,
                message.delivery_attempt,
                RuntimeError::code_of(err.as_ref()),
                err
            );
        }

        result
    }

    async fn invoke(&self, request: Arc<Request>, payload: T) -> Result<(), SendableError> {
        let handler = Arc::clone(&self.handler);
        AssertUnwindSafe(async move { handler.handle(request, payload).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic);
                Err(Box::new(
                    RuntimeError::internal(format!("subscriber panicked: {message}"))
                        .with_cause(HandlerPanic(message)),
                ))
            })
    }

    fn log_context(&self) -> String {
        format!(
            "service={} topic={} subscription={}",
            self.service, self.topic, self.subscription
        )
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Closes its span exactly once, reporting an abort if the delivery is dropped first.
struct OpenSpan(Option<Box<dyn TraceSpan>>);

impl OpenSpan {
    fn finish(mut self, outcome: Result<(), &SendableError>) {
        if let Some(span) = self.0.take() {
            span.finish(outcome);
        }
    }
}

impl Drop for OpenSpan {
    fn drop(&mut self) {
        if let Some(span) = self.0.take() {
            let aborted: SendableError = Box::new(RuntimeError::internal(
                "delivery aborted before the subscriber returned",
            ));
            span.finish(Err(&aborted));
        }
    }
}

struct OperationScope {
    tracker: Arc<dyn RequestTracker>,
}

impl OperationScope {
    fn begin(tracker: &Arc<dyn RequestTracker>) -> Self {
        tracker.begin_operation();
        Self {
            tracker: Arc::clone(tracker),
        }
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.tracker.finish_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use chrono::Utc;
    use courier_models::ErrorCode;
    use parking_lot::Mutex;
    use std::{
        collections::HashMap,
        error::Error,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct RecordingTracker {
        operations_begun: AtomicUsize,
        operations_finished: AtomicUsize,
        requests_finished: AtomicUsize,
        spans: Arc<Mutex<Vec<Result<(), String>>>>,
    }

    struct RecordingSpan {
        spans: Arc<Mutex<Vec<Result<(), String>>>>,
    }

    impl TraceSpan for RecordingSpan {
        fn finish(self: Box<Self>, outcome: Result<(), &SendableError>) {
            self.spans.lock().push(outcome.map_err(|err| err.to_string()));
        }
    }

    impl RequestTracker for RecordingTracker {
        fn begin_operation(&self) {
            self.operations_begun.fetch_add(1, Ordering::SeqCst);
        }

        fn finish_operation(&self) {
            self.operations_finished.fetch_add(1, Ordering::SeqCst);
        }

        fn begin_request(&self, request: &Arc<Request>) -> Option<Box<dyn TraceSpan>> {
            request.traced.then(|| {
                Box::new(RecordingSpan {
                    spans: Arc::clone(&self.spans),
                }) as Box<dyn TraceSpan>
            })
        }

        fn finish_request(&self, _request: &Request) {
            self.requests_finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug, Error)]
    #[error("order {0} is on hold")]
    struct OnHold(u64);

    fn pipeline<H>(
        handler: H,
        testing: bool,
    ) -> (Arc<DeliveryPipeline<u64>>, Arc<RecordingTracker>)
    where
        H: SubscriptionHandler<u64>,
    {
        let tracker = Arc::new(RecordingTracker::default());
        let pipeline = Arc::new(DeliveryPipeline {
            topic: "orders".into(),
            subscription: "ship-order".into(),
            service: "shipping".into(),
            trace_idx: 3,
            traced: true,
            testing,
            codec: Arc::new(JsonCodec::<u64>::new()),
            handler: Arc::new(handler),
            outstanding: Arc::new(OutstandingTracker::new()),
            request_tracker: Arc::clone(&tracker) as Arc<dyn RequestTracker>,
        });
        (pipeline, tracker)
    }

    fn message(data: &[u8], attempt: u32) -> InboundMessage {
        InboundMessage {
            id: "msg-1".into(),
            publish_time: Utc::now(),
            delivery_attempt: attempt,
            attributes: HashMap::new(),
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn success_populates_request_and_closes_span() {
        let seen = Arc::new(Mutex::new(None));
        let handler = {
            let seen = Arc::clone(&seen);
            move |request: Arc<Request>, order: u64| {
                let seen = Arc::clone(&seen);
                async move {
                    *seen.lock() = Some(((*request).clone(), order));
                    Ok::<(), SendableError>(())
                }
            }
        };
        let (pipeline, tracker) = pipeline(handler, false);

        Arc::clone(&pipeline).deliver(message(b"42", 2)).await.unwrap();

        let (request, order) = seen.lock().take().unwrap();
        assert_eq!(order, 42);
        assert_eq!(request.kind, RequestKind::PubSubMessage);
        assert_eq!(request.service, "shipping");
        assert_eq!(request.message.topic, "orders");
        assert_eq!(request.message.subscription, "ship-order");
        assert_eq!(request.message.message_id, "msg-1");
        assert_eq!(request.message.attempt, 2);
        assert_eq!(request.inputs, vec![b"42".to_vec()]);
        assert_eq!(request.def_loc, 3);
        assert_eq!(
            request.log_context,
            "service=shipping topic=orders subscription=ship-order"
        );

        assert_eq!(*tracker.spans.lock(), vec![Ok::<(), String>(())]);
        assert_eq!(tracker.operations_begun.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.operations_finished.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.requests_finished.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.outstanding.active(), 0);
    }

    #[tokio::test]
    async fn handler_error_is_returned_verbatim() {
        let handler = |_request: Arc<Request>, order: u64| async move {
            Err::<(), SendableError>(Box::new(OnHold(order)))
        };
        let (pipeline, tracker) = pipeline(handler, false);

        let err = Arc::clone(&pipeline).deliver(message(b"7", 1)).await.unwrap_err();

        assert!(matches!(err.downcast_ref::<OnHold>(), Some(OnHold(7))));
        assert_eq!(
            *tracker.spans.lock(),
            vec![Err::<(), String>("order 7 is on hold".to_string())]
        );
        assert_eq!(pipeline.outstanding.active(), 0);
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let handler = |_request: Arc<Request>, order: u64| async move {
            if order > 0 {
                panic!("boom on order {order}");
            }
            Ok::<(), SendableError>(())
        };
        let (pipeline, tracker) = pipeline(handler, false);

        let err = Arc::clone(&pipeline).deliver(message(b"5", 1)).await.unwrap_err();

        let runtime_error = err.downcast_ref::<RuntimeError>().unwrap();
        assert_eq!(runtime_error.code(), ErrorCode::Internal);
        assert_eq!(runtime_error.message(), "subscriber panicked: boom on order 5");
        let cause = runtime_error.source().unwrap();
        assert!(cause.downcast_ref::<HandlerPanic>().is_some());

        assert_eq!(tracker.spans.lock().len(), 1);
        assert!(tracker.spans.lock()[0].is_err());
        assert_eq!(pipeline.outstanding.active(), 0);
        assert_eq!(tracker.operations_finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decode_failure_skips_handler() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let handler = {
            let invoked = Arc::clone(&invoked);
            move |_request: Arc<Request>, _order: u64| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), SendableError>(()) }
            }
        };
        let (pipeline, tracker) = pipeline(handler, false);

        let err = Arc::clone(&pipeline)
            .deliver(message(b"not json", 3))
            .await
            .unwrap_err();

        let runtime_error = err.downcast_ref::<RuntimeError>().unwrap();
        assert_eq!(runtime_error.code(), ErrorCode::Internal);
        assert_eq!(runtime_error.message(), "failed to unmarshal message");
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert!(tracker.spans.lock().is_empty());
        assert_eq!(tracker.requests_finished.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.outstanding.active(), 0);
    }

    #[tokio::test]
    async fn testing_mode_skips_operation_hooks() {
        let handler = |_request: Arc<Request>, _order: u64| async { Ok::<(), SendableError>(()) };
        let (pipeline, tracker) = pipeline(handler, true);

        Arc::clone(&pipeline).deliver(message(b"1", 1)).await.unwrap();

        assert_eq!(tracker.operations_begun.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.operations_finished.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.requests_finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_delivery_decrements_and_closes_span() {
        let handler = |_request: Arc<Request>, _order: u64| async {
            std::future::pending::<()>().await;
            Ok::<(), SendableError>(())
        };
        let (pipeline, tracker) = pipeline(handler, false);

        let delivery = tokio::spawn(Arc::clone(&pipeline).deliver(message(b"1", 1)));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(pipeline.outstanding.active(), 1);
        assert!(tracker.spans.lock().is_empty());

        delivery.abort();
        let _ = delivery.await;
        assert_eq!(pipeline.outstanding.active(), 0);

        let spans = tracker.spans.lock();
        assert_eq!(spans.len(), 1);
        assert!(matches!(&spans[0], Err(reason) if reason.contains("aborted")));
        assert_eq!(tracker.operations_finished.load(Ordering::SeqCst), 1);
    }
}
