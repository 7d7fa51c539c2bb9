use std::time::Duration;

/// Engine-wide limits and defaults.
///
/// Requests beyond a limit are revised (intervals, queue sizes) or refused
/// (subscription and item counts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Application URI registered as namespace 1.
    pub server_uri: String,
    /// Used when a subscription is created with a zero interval.
    pub default_publishing_interval: Duration,
    /// Floor for sampling and publishing intervals.
    pub min_sampling_interval: Duration,
    pub max_queue_size: usize,
    pub max_subscriptions: usize,
    pub max_monitored_items_per_subscription: usize,
    /// How long a handler call already in progress may keep running once
    /// its subscription is being deleted. Undispatched notifications are
    /// dropped immediately.
    pub delivery_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_uri: "urn:opc-ua-engine:server".to_string(),
            default_publishing_interval: Duration::from_millis(1000),
            min_sampling_interval: Duration::from_millis(10),
            max_queue_size: 1000,
            max_subscriptions: 100,
            max_monitored_items_per_subscription: 1000,
            delivery_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn with_server_uri(mut self, uri: impl Into<String>) -> Self {
        self.server_uri = uri.into();
        self
    }

    pub fn with_default_publishing_interval(mut self, interval: Duration) -> Self {
        self.default_publishing_interval = interval;
        self
    }

    pub fn with_min_sampling_interval(mut self, interval: Duration) -> Self {
        self.min_sampling_interval = interval;
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size.max(1);
        self
    }

    pub fn with_max_subscriptions(mut self, count: usize) -> Self {
        self.max_subscriptions = count;
        self
    }

    pub fn with_max_monitored_items(mut self, count: usize) -> Self {
        self.max_monitored_items_per_subscription = count;
        self
    }

    pub fn with_delivery_grace(mut self, grace: Duration) -> Self {
        self.delivery_grace = grace;
        self
    }

    /// Revised publishing interval: zero selects the default, anything
    /// below the sampling floor is raised to it.
    pub fn revise_publishing_interval(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_publishing_interval.max(self.min_sampling_interval)
        } else {
            requested.max(self.min_sampling_interval)
        }
    }

    /// Revised sampling interval: zero follows the publishing interval.
    pub fn revise_sampling_interval(&self, requested: Duration, publishing: Duration) -> Duration {
        if requested.is_zero() {
            publishing
        } else {
            requested.max(self.min_sampling_interval)
        }
    }

    pub fn revise_queue_size(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_queue_size.max(1))
    }
}
