use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tracing::error;

pub struct Metrics {
    registry: Registry,
    pub reviews: Counter,
    pub patched: Counter,
    pub denied: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::with_prefix("macvtap_webhook");
        let reviews = Counter::default();
        let patched = Counter::default();
        let denied = Counter::default();
        registry.register(
            "admission_reviews",
            "Number of admission reviews handled",
            reviews.clone(),
        );
        registry.register(
            "pods_patched",
            "Number of responses that carried a security context patch",
            patched.clone(),
        );
        registry.register(
            "pods_denied",
            "Number of reviews denied because the pod object failed to parse",
            denied.clone(),
        );
        Self {
            registry,
            reviews,
            patched,
            denied,
        }
    }
}

impl Metrics {
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        match prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            Ok(()) => buffer,
            Err(e) => {
                error!(%e, "failed to encode metrics");
                String::new()
            }
        }
    }
}
