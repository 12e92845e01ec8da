use prometheus::core::Collector;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub session_checks_total: IntCounterVec,
    pub login_attempts_total: IntCounter,
    pub login_failures_total: IntCounter,
    pub lockouts_total: IntCounter,
    pub api_requests_total: IntCounterVec,
    pub api_reauth_total: IntCounter,
    pub api_latency_ms: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let session_checks_total = register(
            &registry,
            IntCounterVec::new(
                prometheus::Opts::new("bjs_session_checks_total", "Session probes by result"),
                &["result"],
            )
            .unwrap(),
        );
        let login_attempts_total = register(
            &registry,
            IntCounter::new("bjs_login_attempts_total", "Form login attempts").unwrap(),
        );
        let login_failures_total = register(
            &registry,
            IntCounter::new(
                "bjs_login_failures_total",
                "Login flows that exhausted their retries",
            )
            .unwrap(),
        );
        let lockouts_total = register(
            &registry,
            IntCounter::new("bjs_lockouts_total", "Times login was disabled by lockout").unwrap(),
        );
        let api_requests_total = register(
            &registry,
            IntCounterVec::new(
                prometheus::Opts::new("bjs_api_requests_total", "Panel API calls by endpoint"),
                &["endpoint"],
            )
            .unwrap(),
        );
        let api_reauth_total = register(
            &registry,
            IntCounter::new(
                "bjs_api_reauth_total",
                "API calls retried after a 401/403 forced re-authentication",
            )
            .unwrap(),
        );
        let api_latency_ms = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("bjs_api_latency_ms", "Panel API latency in ms")
                    .buckets(prometheus::exponential_buckets(5.0, 2.0, 12).unwrap()),
            )
            .unwrap(),
        );

        Self {
            registry,
            session_checks_total,
            login_attempts_total,
            login_failures_total,
            lockouts_total,
            api_requests_total,
            api_reauth_total,
            api_latency_ms,
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(
                target: "metrics",
                error = %err,
                "failed to encode prometheus metrics"
            );
        }
        buffer
    }

    pub fn observe_session_check(&self, valid: bool) {
        let result = if valid { "valid" } else { "invalid" };
        self.session_checks_total.with_label_values(&[result]).inc();
    }

    pub fn inc_login_attempts(&self) {
        self.login_attempts_total.inc();
    }

    pub fn inc_login_failures(&self) {
        self.login_failures_total.inc();
    }

    pub fn inc_lockouts(&self) {
        self.lockouts_total.inc();
    }

    pub fn observe_api_request(&self, endpoint: &str, latency_ms: f64) {
        self.api_requests_total.with_label_values(&[endpoint]).inc();
        self.api_latency_ms.observe(latency_ms);
    }

    pub fn inc_api_reauth(&self) {
        self.api_reauth_total.inc();
    }
}

fn register<M>(registry: &Registry, metric: M) -> M
where
    M: Collector + Clone + 'static,
{
    registry
        .register(Box::new(metric.clone()))
        .expect("metric registration");
    metric
}
