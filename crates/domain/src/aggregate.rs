//! Aggregate and domain event traits for saga participants.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded by an aggregate, stored as an envelope payload.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Event type name written to the envelope (e.g. "PaymentCaptured").
    fn event_type(&self) -> &'static str;
}

/// An event-sourced entity owned by one service.
///
/// State is rebuilt by replaying the aggregate's events in version order.
/// `apply` must not fail and must not have side effects: the event has
/// already happened.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// Events this aggregate records.
    type Event: DomainEvent;

    /// Business-rule violations reported when a command is rejected.
    type Error: std::error::Error + Send + Sync;

    /// Aggregate type name written to every envelope.
    fn aggregate_type() -> &'static str;

    /// None until the first event has been applied.
    fn id(&self) -> Option<AggregateId>;

    /// Version of the last applied event (0 for a fresh aggregate).
    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    /// Applies events in order.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum PaymentEvent {
        Authorized { payment_id: AggregateId, amount: u64 },
        Captured,
    }

    impl DomainEvent for PaymentEvent {
        fn event_type(&self) -> &'static str {
            match self {
                PaymentEvent::Authorized { .. } => "PaymentAuthorized",
                PaymentEvent::Captured => "PaymentCaptured",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Payment {
        id: Option<AggregateId>,
        amount: u64,
        captured: bool,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("payment rejected")]
    struct PaymentRejected;

    impl Aggregate for Payment {
        type Event = PaymentEvent;
        type Error = PaymentRejected;

        fn aggregate_type() -> &'static str {
            "Payment"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                PaymentEvent::Authorized { payment_id, amount } => {
                    self.id = Some(payment_id);
                    self.amount = amount;
                }
                PaymentEvent::Captured => self.captured = true,
            }
        }
    }

    #[test]
    fn replaying_events_rebuilds_state() {
        let payment_id = AggregateId::new();
        let mut payment = Payment::default();

        payment.apply_events([
            PaymentEvent::Authorized {
                payment_id,
                amount: 1250,
            },
            PaymentEvent::Captured,
        ]);

        assert_eq!(payment.id(), Some(payment_id));
        assert_eq!(payment.amount, 1250);
        assert!(payment.captured);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(PaymentEvent::Captured.event_type(), "PaymentCaptured");
        assert_eq!(Payment::aggregate_type(), "Payment");
    }
}
