use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a `Uuid`-backed identifier with the usual conversions.
///
/// Each identifier is a distinct type so an aggregate id can never be passed
/// where a saga step id is expected, even though both are UUIDs on the wire.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for an aggregate instance in an event log.
    AggregateId
}

uuid_id! {
    /// Identifier shared by every step of one distributed transaction.
    SagaInstanceId
}

uuid_id! {
    /// Globally unique identifier of a single saga step.
    ///
    /// Also the idempotency key of the step tracking state machine.
    SagaStepId
}

impl From<SagaStepId> for AggregateId {
    fn from(id: SagaStepId) -> Self {
        AggregateId(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(AggregateId::new(), AggregateId::new());
        assert_ne!(SagaInstanceId::new(), SagaInstanceId::new());
        assert_ne!(SagaStepId::new(), SagaStepId::new());
    }

    #[test]
    fn from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(SagaStepId::from_uuid(uuid).as_uuid(), uuid);
        assert_eq!(Uuid::from(SagaInstanceId::from(uuid)), uuid);
    }

    #[test]
    fn step_id_maps_to_aggregate_id_with_same_uuid() {
        let step = SagaStepId::new();
        let aggregate: AggregateId = step.into();
        assert_eq!(aggregate.as_uuid(), step.as_uuid());
    }

    #[test]
    fn serializes_as_bare_uuid_string() {
        let id = SagaInstanceId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: SagaInstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parses_from_str() {
        let id = SagaStepId::new();
        let parsed: SagaStepId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SagaStepId>().is_err());
    }
}
