//! Prometheus metrics for function calls.

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, HistogramVec,
    IntCounterVec, Registry, TextEncoder,
};
use std::future::Future;

/// Methods the function route accepts. Their label values are created up
/// front so every family is exported before the first request.
pub const FUNCTION_METHODS: [&str; 4] = ["GET", "POST", "PATCH", "DELETE"];

/// Process-wide function metrics. Clones share the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub(crate) function_calls_total: IntCounterVec,
    pub(crate) function_duration_seconds: HistogramVec,
    pub(crate) function_failures_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let function_calls_total = register_int_counter_vec_with_registry!("function_calls_total", "Number of calls to user function", &["method"], registry)?;
        let function_duration_seconds = register_histogram_vec_with_registry!("function_duration_seconds", "Duration of user function in seconds", &["method"], registry)?;
        let function_failures_total = register_int_counter_vec_with_registry!("function_failures_total", "Number of exceptions in user function", &["method"], registry)?;

        for method in FUNCTION_METHODS {
            function_calls_total.with_label_values(&[method]);
            function_duration_seconds.with_label_values(&[method]);
            function_failures_total.with_label_values(&[method]);
        }

        Ok(Self {
            registry,

            function_calls_total,
            function_duration_seconds,
            function_failures_total,
        })
    }

    /// Account for one call of the function.
    ///
    /// Counts the call, then times `region` into the duration histogram
    /// whatever it returns, and counts a failure when it returns `Err`.
    pub async fn observe<F, T, E>(&self, method: &str, region: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.function_calls_total.with_label_values(&[method]).inc();
        let timer = self.function_duration_seconds.with_label_values(&[method]).start_timer();

        let result = region.await;

        timer.observe_duration();
        if result.is_err() {
            self.function_failures_total.with_label_values(&[method]).inc();
        }
        result
    }

    pub fn calls(&self, method: &str) -> u64 {
        self.function_calls_total.with_label_values(&[method]).get()
    }

    pub fn failures(&self, method: &str) -> u64 {
        self.function_failures_total.with_label_values(&[method]).get()
    }

    /// Number of observations in the duration histogram.
    pub fn observations(&self, method: &str) -> u64 {
        self.function_duration_seconds.with_label_values(&[method]).get_sample_count()
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let metrics = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&metrics)
    }

    /// Content type of [`Metrics::encode`] output.
    pub fn content_type() -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observe_success() {
        let metrics = Metrics::new().unwrap();
        let result: Result<u32, ()> = metrics.observe("POST", async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert_eq!(metrics.calls("POST"), 1);
        assert_eq!(metrics.observations("POST"), 1);
        assert_eq!(metrics.failures("POST"), 0);
        assert_eq!(metrics.calls("GET"), 0);
    }

    #[tokio::test]
    async fn test_observe_failure() {
        let metrics = Metrics::new().unwrap();
        let result: Result<(), &str> = metrics.observe("GET", async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(metrics.calls("GET"), 1);
        assert_eq!(metrics.observations("GET"), 1);
        assert_eq!(metrics.failures("GET"), 1);
    }

    #[test]
    fn test_families_exported_before_first_call() {
        let metrics = Metrics::new().unwrap();
        let text = metrics.encode().unwrap();
        for family in ["function_calls_total", "function_duration_seconds", "function_failures_total"] {
            assert!(text.contains(&format!("# TYPE {}", family)), "missing {}", family);
        }
        assert!(Metrics::content_type().starts_with("text/plain"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.function_calls_total.with_label_values(&["GET"]).inc();
        assert_eq!(a.calls("GET"), 1);
        assert_eq!(b.calls("GET"), 0);
    }
}
