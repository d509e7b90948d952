//! Per-request pipeline: event, invocation, classification.

use crate::error::ShimError;
use crate::function::{
    classify, CallSummary, EventBuilder, FunctionContext, Handler, Invoker,
};
use crate::http::{FunctionRequest, FunctionResponse};
use crate::runtime::Metrics;
use hyper::Method;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Runs the function for one request at a time; share it behind an `Arc`
/// to serve requests concurrently.
pub struct RequestHandler {
    handler: Handler,
    context: FunctionContext,
    invoker: Arc<dyn Invoker>,
    metrics: Metrics,
}

impl RequestHandler {
    pub fn new(
        handler: Handler,
        context: FunctionContext,
        invoker: Arc<dyn Invoker>,
        metrics: Metrics,
    ) -> Self {
        Self {
            handler,
            context,
            invoker,
            metrics,
        }
    }

    pub fn context(&self) -> &FunctionContext {
        &self.context
    }

    /// Handle one `method` request whose buffered form `request` yields.
    ///
    /// `request` is awaited inside the metrics region along with the rest of
    /// the pipeline, so a body that is too large, unreadable or malformed
    /// counts as a call and as a failure just like a handler fault.
    pub async fn handle<F>(&self, method: &Method, request: F) -> Result<FunctionResponse, ShimError>
    where
        F: Future<Output = Result<FunctionRequest, ShimError>>,
    {
        let region = async {
            let request = request.await?;
            self.run(request).await
        };
        self.metrics.observe(method.as_str(), region).await
    }

    async fn run(&self, request: FunctionRequest) -> Result<FunctionResponse, ShimError> {
        let request = Arc::new(request);

        let event = EventBuilder::build(request.clone())?;
        debug!("Event built for {} {}", request.method, request.url);

        let outcome = self
            .invoker
            .invoke(&self.handler, &event, &self.context, self.context.timeout)
            .await;
        debug!("Invocation of '{}' finished: {:?}", self.handler.name(), outcome);

        let call = CallSummary::new(&request, event.data.into_value());
        classify(outcome, call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Event, InvocationOutcome};
    use async_trait::async_trait;
    use hyper::StatusCode;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Invoker that answers with a fixed outcome and counts its calls.
    struct FixedInvoker {
        outcome: InvocationOutcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Invoker for FixedInvoker {
        async fn invoke(
            &self,
            _handler: &Handler,
            _event: &Event,
            _context: &FunctionContext,
            _timeout: f64,
        ) -> InvocationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn pipeline(outcome: InvocationOutcome) -> (RequestHandler, Arc<FixedInvoker>, Metrics) {
        let invoker = Arc::new(FixedInvoker {
            outcome,
            calls: AtomicUsize::new(0),
        });
        let metrics = Metrics::new().unwrap();
        let handler = RequestHandler::new(
            Handler::new("fixed", "/bin/true"),
            FunctionContext::new("fixed"),
            invoker.clone(),
            metrics.clone(),
        );
        (handler, invoker, metrics)
    }

    async fn handle(
        handler: &RequestHandler,
        request: FunctionRequest,
    ) -> Result<FunctionResponse, ShimError> {
        let method = request.method.clone();
        handler.handle(&method, async { Ok::<_, ShimError>(request) }).await
    }

    #[tokio::test]
    async fn test_every_outcome_is_counted_once() {
        let outcomes = [
            InvocationOutcome::Success(json!({"ok": true})),
            InvocationOutcome::Success(json!({"error": "nope"})),
            InvocationOutcome::Fault("boom".into()),
            InvocationOutcome::TimedOut,
        ];
        for outcome in outcomes {
            let (handler, _, metrics) = pipeline(outcome.clone());
            let _ = handle(&handler, FunctionRequest::new(Method::PATCH, "/")).await;
            assert_eq!(metrics.calls("PATCH"), 1, "{:?}", outcome);
            assert_eq!(metrics.observations("PATCH"), 1, "{:?}", outcome);
            let expected_failures = matches!(outcome, InvocationOutcome::Fault(_)) as u64;
            assert_eq!(metrics.failures("PATCH"), expected_failures, "{:?}", outcome);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_skips_invocation() {
        let (handler, invoker, metrics) = pipeline(InvocationOutcome::Success(Value::Null));
        let request = FunctionRequest::new(Method::POST, "/")
            .header("content-type", "application/json")
            .body("{");
        let err = assert_err!(handle(&handler, request).await);
        assert!(matches!(err, ShimError::MalformedBody(_)));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.calls("POST"), 1);
        assert_eq!(metrics.failures("POST"), 1);
    }

    #[tokio::test]
    async fn test_error_result_carries_event_body() {
        let (handler, _, _) = pipeline(InvocationOutcome::Success(json!({"error": "bad"})));
        let request = FunctionRequest::new(Method::POST, "/")
            .header("content-type", "application/json")
            .body(r#"{"a":1}"#);
        let response = assert_ok!(handle(&handler, request).await);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        let body: Value = response.json_body().unwrap().unwrap();
        assert_eq!(body["body"], json!({"a": 1}));
        assert_eq!(body["method"], json!("POST"));
    }

    #[tokio::test]
    async fn test_unreadable_body_is_counted() {
        let (handler, invoker, metrics) = pipeline(InvocationOutcome::Success(Value::Null));
        let result = handler
            .handle(&Method::POST, async {
                Err::<FunctionRequest, _>(ShimError::PayloadTooLarge(16))
            })
            .await;
        assert!(matches!(assert_err!(result), ShimError::PayloadTooLarge(16)));
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.calls("POST"), 1);
        assert_eq!(metrics.observations("POST"), 1);
        assert_eq!(metrics.failures("POST"), 1);
    }
}
