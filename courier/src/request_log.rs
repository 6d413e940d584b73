use std::{sync::Arc, time::Instant};

use courier_models::SendableError;
use courier_pubsub::{Request, RequestTracker, TraceSpan};
use log::debug;

/// Records each traced delivery as a debug log line with its duration and outcome.
pub struct LoggingRequestTracker;

struct LoggedSpan {
    request: Arc<Request>,
    started: Instant,
}

impl RequestTracker for LoggingRequestTracker {
    fn begin_request(&self, request: &Arc<Request>) -> Option<Box<dyn TraceSpan>> {
        if !request.traced {
            return None;
        }

        Some(Box::new(LoggedSpan {
            request: Arc::clone(request),
            started: Instant::now(),
        }))
    }
}

impl TraceSpan for LoggedSpan {
    fn finish(self: Box<Self>, outcome: Result<(), &SendableError>) {
        let data = &self.request.message;
        let outcome = match outcome {
            Ok(()) => "ok".to_string(),
            Err(err) => format!("error: {err}"),
        };
        debug!(
            "trace {}/{} msg_id={} attempt={} took {:?}: {}",
            data.topic,
            data.subscription,
            data.message_id,
            data.attempt,
            self.started.elapsed(),
            outcome
        );
    }
}
