use chrono::Duration;

/// Time windows that drive the order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPolicy {
    /// How long a checkout hold lives before the sweeper may release it.
    pub reservation_ttl: Duration,

    /// How long the buyer has to pay after choosing a payment method.
    pub payment_window: Duration,

    /// Minimum time between delivery and completion.
    pub min_time_since_delivery: Duration,

    /// How long the buyer may request a return after delivery.
    pub return_window: Duration,

    /// Delay after payment before an order is scheduled for auto-completion.
    pub auto_complete_after: Duration,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::minutes(15),
            payment_window: Duration::hours(24),
            min_time_since_delivery: Duration::days(1),
            return_window: Duration::days(7),
            auto_complete_after: Duration::days(7),
        }
    }
}

impl OrderPolicy {
    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn with_payment_window(mut self, window: Duration) -> Self {
        self.payment_window = window;
        self
    }
}
