use chrono::{DateTime, Utc};
use common::{OrderId, ReservationId, StockKey};
use serde::{Deserialize, Serialize};

use super::UnknownVariant;

/// Lifecycle of a stock hold.
///
/// ```text
/// Pending ──┬──► Confirmed
///           └──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
}

impl ReservationStatus {
    /// Returns true for statuses that still count as the line item's active hold.
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Released => "RELEASED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(UnknownVariant {
                kind: "reservation status",
                value: other.to_string(),
            }),
        }
    }
}

/// A time-bounded hold of `quantity` units of one stock row for one order.
///
/// A reservation leaves `Pending` exactly once; after that it is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    #[serde(flatten)]
    pub key: StockKey,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub release_reason: Option<String>,
}

impl Reservation {
    /// Creates a new pending hold.
    pub fn pending(
        order_id: OrderId,
        key: StockKey,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            order_id,
            key,
            quantity,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at,
            resolved_at: None,
            release_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// Returns true if the hold is still pending at or after its deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at <= now
    }

    /// Marks a pending hold confirmed. Returns false if it was already resolved.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = ReservationStatus::Confirmed;
        self.resolved_at = Some(now);
        true
    }

    /// Marks a pending hold released. Returns false if it was already resolved.
    pub fn release(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = ReservationStatus::Released;
        self.resolved_at = Some(now);
        self.release_reason = Some(reason.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn hold() -> Reservation {
        let now = Utc::now();
        Reservation::pending(
            OrderId::new(),
            StockKey::product("SKU-1"),
            2,
            now,
            now + Duration::minutes(15),
        )
    }

    #[test]
    fn resolves_only_once() {
        let now = Utc::now();
        let mut reservation = hold();

        assert!(reservation.confirm(now));
        assert!(!reservation.release("late expiry", now));
        assert!(!reservation.confirm(now));
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert!(reservation.release_reason.is_none());
    }

    #[test]
    fn expiry_applies_to_pending_only() {
        let mut reservation = hold();
        let later = reservation.expires_at + Duration::seconds(1);

        assert!(!reservation.is_expired(reservation.created_at));
        assert!(reservation.is_expired(later));

        reservation.release("cancelled", later);
        assert!(!reservation.is_expired(later));
        assert!(!reservation.status.is_active());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("HELD".parse::<ReservationStatus>().is_err());
    }
}
