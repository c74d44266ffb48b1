use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockledger_core::ProductId;
use stockledger_events::EventEnvelope;
use stockledger_inventory::LedgerEvent;

/// Replenishment read model: current stock position of one good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub reserved: i64,
    pub reorder_level: i64,
    pub max_stock_level: i64,
}

impl StockLevel {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn needs_reorder(&self) -> bool {
        self.on_hand <= self.reorder_level
    }

    /// Units to order to refill up to the max stock level; zero when no reorder is due.
    pub fn suggested_order_quantity(&self) -> i64 {
        if !self.needs_reorder() {
            return 0;
        }
        (self.max_stock_level - self.on_hand).max(0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize ledger event: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("no stock level for product {0}; the stream was joined after the ledger opened")]
    MissingBaseline(ProductId),
}

#[derive(Debug, Default)]
struct State {
    levels: BTreeMap<ProductId, StockLevel>,
    // Outlives the level: one entry per stream ever seen, closed ones included.
    cursors: HashMap<ProductId, u64>,
}

/// Reorder projection.
///
/// Consumes published ledger envelopes (JSON payloads) and keeps one
/// [`StockLevel`] per open ledger. Disposable: it can be rebuilt from the
/// envelope stream at any time.
///
/// Cursors are never dropped, not even on `LedgerClosed`, so redelivered
/// envelopes of a closed stream cannot resurrect its level. Memory therefore
/// grows by one cursor per good ever tracked; `rebuild_from_scratch` resets it.
#[derive(Debug, Default)]
pub struct ReorderProjection {
    state: RwLock<State>,
}

impl ReorderProjection {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, product_id: ProductId) -> Option<StockLevel> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .levels
            .get(&product_id)
            .cloned()
    }

    /// All tracked levels, sorted by product id.
    pub fn list(&self) -> Vec<StockLevel> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .levels
            .values()
            .cloned()
            .collect()
    }

    /// Goods at or below their reorder level, sorted by product id.
    pub fn low_stock(&self) -> Vec<StockLevel> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .levels
            .values()
            .filter(|level| level.needs_reorder())
            .cloned()
            .collect()
    }

    /// Last applied sequence number for a ledger stream.
    pub fn cursor(&self, product_id: ProductId) -> Option<u64> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .cursors
            .get(&product_id)
            .copied()
    }

    /// Drop the level of a removed good. The cursor is kept so late
    /// duplicates of its stream stay ignored.
    pub fn forget(&self, product_id: ProductId) -> Option<StockLevel> {
        self.write_state().levels.remove(&product_id)
    }

    /// Apply a published envelope.
    ///
    /// - Sequence must be positive; replays at or below the cursor are ignored
    /// - After the first event of a stream, sequence numbers must advance by one
    /// - The payload's product must match the envelope's stream
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ProjectionError> {
        let product_id = envelope.product_id();
        let seq = envelope.sequence_number();

        let mut state = self.write_state();
        let last = state.cursors.get(&product_id).copied().unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: LedgerEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        if event.product_id() != product_id {
            return Err(ProjectionError::StreamMismatch(
                "event product_id does not match envelope product_id".to_string(),
            ));
        }

        match event {
            LedgerEvent::LedgerOpened(e) => {
                state.levels.insert(
                    product_id,
                    StockLevel {
                        product_id,
                        on_hand: 0,
                        reserved: 0,
                        reorder_level: e.settings.reorder_level,
                        max_stock_level: e.settings.max_stock_level,
                    },
                );
            }
            LedgerEvent::LedgerClosed(_) => {
                state.levels.remove(&product_id);
            }
            other => {
                let level = state
                    .levels
                    .get_mut(&product_id)
                    .ok_or(ProjectionError::MissingBaseline(product_id))?;
                apply_to_level(level, &other);
            }
        }

        state.cursors.insert(product_id, seq);
        Ok(())
    }

    /// Rebuild from scratch by replaying envelopes in (product, sequence) order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        {
            let mut state = self.write_state();
            state.levels.clear();
            state.cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.product_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        tracing::info!(envelopes = envs.len(), "reorder projection rebuilt");
        Ok(())
    }
}

fn apply_to_level(level: &mut StockLevel, event: &LedgerEvent) {
    match event {
        LedgerEvent::OnHandSet(e) => level.on_hand = e.on_hand,
        LedgerEvent::ReorderLevelSet(e) => level.reorder_level = e.reorder_level,
        LedgerEvent::MaxStockLevelSet(e) => level.max_stock_level = e.max_stock_level,
        LedgerEvent::ThresholdsSet(e) => {
            level.reorder_level = e.reorder_level;
            level.max_stock_level = e.max_stock_level;
        }
        LedgerEvent::StockReserved(e) => level.reserved += e.quantity,
        LedgerEvent::StockReleased(e) => level.reserved -= e.quantity,
        LedgerEvent::StockAdded(e) => level.on_hand += e.quantity,
        LedgerEvent::StockRemoved(e) => {
            level.on_hand -= e.quantity;
            level.reserved -= e.reserved_reduction;
        }
        LedgerEvent::LedgerOpened(_) | LedgerEvent::LedgerClosed(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_events::Event;
    use stockledger_inventory::{
        LedgerClosed, LedgerOpened, LedgerSettings, OnHandSet, StockRemoved, StockReserved,
    };

    fn envelope(product_id: ProductId, seq: u64, event: LedgerEvent) -> EventEnvelope<JsonValue> {
        let payload = serde_json::to_value(&event).unwrap();
        EventEnvelope::wrap(product_id, seq, event).map(|_| payload)
    }

    fn opened(product_id: ProductId, reorder_level: i64, max_stock_level: i64) -> LedgerEvent {
        LedgerEvent::LedgerOpened(LedgerOpened {
            product_id,
            settings: LedgerSettings::with_thresholds(reorder_level, max_stock_level),
            occurred_at: Utc::now(),
        })
    }

    fn on_hand_set(product_id: ProductId, on_hand: i64) -> LedgerEvent {
        LedgerEvent::OnHandSet(OnHandSet {
            product_id,
            on_hand,
            occurred_at: Utc::now(),
        })
    }

    fn reserved(product_id: ProductId, quantity: i64) -> LedgerEvent {
        LedgerEvent::StockReserved(StockReserved {
            product_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn tracks_levels_and_reorder_suggestion() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();

        projection.apply_envelope(&envelope(product_id, 1, opened(product_id, 5, 100))).unwrap();
        projection.apply_envelope(&envelope(product_id, 2, on_hand_set(product_id, 10))).unwrap();
        projection.apply_envelope(&envelope(product_id, 3, reserved(product_id, 4))).unwrap();
        projection
            .apply_envelope(&envelope(
                product_id,
                4,
                LedgerEvent::StockRemoved(StockRemoved {
                    product_id,
                    quantity: 6,
                    reserved_reduction: 4,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();

        let level = projection.get(product_id).unwrap();
        assert_eq!(level.on_hand, 4);
        assert_eq!(level.reserved, 0);
        assert!(level.needs_reorder());
        assert_eq!(level.suggested_order_quantity(), 96);
        assert_eq!(projection.low_stock(), vec![level]);
    }

    #[test]
    fn no_suggestion_above_reorder_level() {
        let level = StockLevel {
            product_id: ProductId::new(),
            on_hand: 50,
            reserved: 0,
            reorder_level: 5,
            max_stock_level: 100,
        };
        assert_eq!(level.suggested_order_quantity(), 0);
    }

    #[test]
    fn suggestion_never_negative() {
        let level = StockLevel {
            product_id: ProductId::new(),
            on_hand: 8,
            reserved: 0,
            reorder_level: 10,
            max_stock_level: 6,
        };
        assert!(level.needs_reorder());
        assert_eq!(level.suggested_order_quantity(), 0);
    }

    #[test]
    fn duplicates_are_ignored() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();

        let open = envelope(product_id, 1, opened(product_id, 5, 100));
        let set = envelope(product_id, 2, on_hand_set(product_id, 30));
        let reserve = envelope(product_id, 3, reserved(product_id, 10));

        projection.apply_envelope(&open).unwrap();
        projection.apply_envelope(&set).unwrap();
        projection.apply_envelope(&reserve).unwrap();
        projection.apply_envelope(&reserve).unwrap();
        projection.apply_envelope(&set).unwrap();

        let level = projection.get(product_id).unwrap();
        assert_eq!(level.on_hand, 30);
        assert_eq!(level.reserved, 10);
        assert_eq!(projection.cursor(product_id), Some(3));
    }

    #[test]
    fn gaps_are_rejected() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();

        projection.apply_envelope(&envelope(product_id, 1, opened(product_id, 5, 100))).unwrap();
        let err = projection
            .apply_envelope(&envelope(product_id, 3, on_hand_set(product_id, 30)))
            .unwrap_err();

        assert_eq!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 3 });
        assert_eq!(projection.cursor(product_id), Some(1));
    }

    #[test]
    fn zero_sequence_is_rejected() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        let err = projection
            .apply_envelope(&envelope(product_id, 0, opened(product_id, 5, 100)))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { found: 0, .. }));
    }

    #[test]
    fn mismatched_stream_is_rejected() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        let other = ProductId::new();

        let err = projection
            .apply_envelope(&envelope(product_id, 1, opened(other, 5, 100)))
            .unwrap_err();
        assert!(matches!(err, ProjectionError::StreamMismatch(_)));
        assert!(projection.get(product_id).is_none());
    }

    #[test]
    fn event_without_baseline_is_rejected() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        let err = projection
            .apply_envelope(&envelope(product_id, 7, reserved(product_id, 1)))
            .unwrap_err();
        assert_eq!(err, ProjectionError::MissingBaseline(product_id));
        assert_eq!(projection.cursor(product_id), None);
    }

    #[test]
    fn closed_ledger_drops_level() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        let closed = LedgerEvent::LedgerClosed(LedgerClosed {
            product_id,
            occurred_at: Utc::now(),
        });
        assert_eq!(closed.event_type(), "inventory.ledger.closed");

        projection.apply_envelope(&envelope(product_id, 1, opened(product_id, 5, 100))).unwrap();
        projection.apply_envelope(&envelope(product_id, 2, closed)).unwrap();

        assert!(projection.get(product_id).is_none());
        assert!(projection.low_stock().is_empty());
    }

    #[test]
    fn redelivered_stream_stays_closed() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        let open = envelope(product_id, 1, opened(product_id, 5, 100));
        let set = envelope(product_id, 2, on_hand_set(product_id, 3));
        let closed = envelope(
            product_id,
            3,
            LedgerEvent::LedgerClosed(LedgerClosed {
                product_id,
                occurred_at: Utc::now(),
            }),
        );

        for env in [&open, &set, &closed] {
            projection.apply_envelope(env).unwrap();
        }
        projection.apply_envelope(&open).unwrap();
        projection.apply_envelope(&set).unwrap();

        assert!(projection.get(product_id).is_none());
        assert!(projection.low_stock().is_empty());
        assert_eq!(projection.cursor(product_id), Some(3));
    }

    #[test]
    fn forget_removes_level() {
        let projection = ReorderProjection::new();
        let product_id = ProductId::new();
        projection.apply_envelope(&envelope(product_id, 1, opened(product_id, 5, 100))).unwrap();

        assert!(projection.forget(product_id).is_some());
        assert!(projection.list().is_empty());
        assert_eq!(projection.cursor(product_id), Some(1));
    }

    #[test]
    fn rebuild_replays_out_of_order_input() {
        let projection = ReorderProjection::new();
        let first = ProductId::new();
        let second = ProductId::new();

        let envelopes = vec![
            envelope(second, 2, on_hand_set(second, 2)),
            envelope(first, 2, on_hand_set(first, 40)),
            envelope(first, 1, opened(first, 5, 100)),
            envelope(second, 1, opened(second, 5, 20)),
        ];

        projection.rebuild_from_scratch(envelopes).unwrap();

        let levels = projection.list();
        assert_eq!(levels.len(), 2);
        assert!(levels.windows(2).all(|w| w[0].product_id < w[1].product_id));

        let low: Vec<_> = projection.low_stock().into_iter().map(|l| l.product_id).collect();
        assert_eq!(low, vec![second]);
        assert_eq!(projection.get(second).unwrap().suggested_order_quantity(), 18);
    }
}
