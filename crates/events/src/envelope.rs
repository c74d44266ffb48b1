use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::ProductId;

use crate::Event;

/// Envelope for a published event, carrying stream metadata.
///
/// - One stream per tracked good, keyed by `product_id`.
/// - `sequence_number` is the ledger version after the event was applied, so it
///   increases by exactly one per event within a stream.
/// - `payload` is the serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    product_id: ProductId,

    event_type: String,
    occurred_at: DateTime<Utc>,

    /// Monotonically increasing position in the ledger stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        product_id: ProductId,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            product_id,
            event_type: event_type.into(),
            occurred_at,
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Re-wrap the payload, keeping the stream metadata.
    pub fn map<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            product_id: self.product_id,
            event_type: self.event_type,
            occurred_at: self.occurred_at,
            sequence_number: self.sequence_number,
            payload: f(self.payload),
        }
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, taking type name and business time from the event itself.
    pub fn wrap(product_id: ProductId, sequence_number: u64, event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            product_id,
            event.event_type(),
            event.occurred_at(),
            sequence_number,
            event,
        )
    }
}
