//! Fleet of stock ledgers, one per tracked good.
//!
//! The registry owns ledger lifecycle (open alongside the good, cascading close
//! when the good is removed), the SKU index, and publication of ledger events
//! to an [`EventBus`]. Callers get a read-only [`LedgerView`]; every change goes
//! through the registry so that it is published.
//!
//! Locking: the index lock guards only map lookups and inserts. Ledger commands
//! run under each ledger's own mutex, so different goods never contend. Where
//! both are taken the order is index, then ledger. Events are published while
//! the ledger lock is held, so `EventBus::publish` must not block.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value as JsonValue;

use stockledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ProductId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{
    LedgerCommand, LedgerEvent, LedgerSettings, LedgerSnapshot, SharedLedger, StockLedger,
};

use crate::config::RegistryConfig;

#[derive(Debug, Default)]
struct Index {
    ledgers: HashMap<ProductId, Arc<SharedLedger>>,
    // Several owners per key only when uniqueness is off.
    skus: HashMap<String, BTreeSet<ProductId>>,
}

impl Index {
    fn link_sku(&mut self, key: String, product_id: ProductId) {
        self.skus.entry(key).or_default().insert(product_id);
    }

    fn unlink_sku(&mut self, key: &str, product_id: ProductId) {
        if let Some(owners) = self.skus.get_mut(key) {
            owners.remove(&product_id);
            if owners.is_empty() {
                self.skus.remove(key);
            }
        }
    }
}

fn sku_key(sku: &str) -> String {
    sku.trim().to_uppercase()
}

/// Read-only handle on a registered ledger.
#[derive(Debug, Clone)]
pub struct LedgerView {
    ledger: Arc<SharedLedger>,
}

impl LedgerView {
    pub fn product_id(&self) -> ProductId {
        self.ledger.product_id()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    pub fn version(&self) -> u64 {
        self.ledger.read(|state| state.version())
    }

    pub fn available(&self) -> i64 {
        self.ledger.available()
    }

    pub fn in_stock(&self) -> bool {
        self.ledger.in_stock()
    }

    pub fn needs_reorder(&self) -> bool {
        self.ledger.needs_reorder()
    }

    pub fn validate(&self) -> bool {
        self.ledger.validate()
    }
}

/// In-memory ledger registry.
#[derive(Debug)]
pub struct LedgerRegistry<B> {
    config: RegistryConfig,
    index: RwLock<Index>,
    bus: B,
}

impl<B> LedgerRegistry<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(config: RegistryConfig, bus: B) -> Self {
        Self {
            config,
            index: RwLock::new(Index::default()),
            bus,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    // Map mutations are single inserts/removes, so a poisoned index is still coherent.
    fn read_index(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ledger(&self, product_id: ProductId) -> DomainResult<Arc<SharedLedger>> {
        self.read_index()
            .ledgers
            .get(&product_id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    /// Open a ledger for a new good with the configured default thresholds.
    pub fn create_default(&self, product_id: ProductId) -> DomainResult<LedgerView> {
        self.create(product_id, self.config.default_settings())
    }

    /// Open a ledger for a new good.
    ///
    /// Fails with `Conflict` if the good already has a ledger or, when SKU
    /// uniqueness is enabled, if the SKU is taken.
    pub fn create(
        &self,
        product_id: ProductId,
        settings: LedgerSettings,
    ) -> DomainResult<LedgerView> {
        let mut ledger = StockLedger::empty(product_id);
        let events = ledger.execute(&LedgerCommand::open(product_id, settings))?;

        let mut index = self.write_index();
        if index.ledgers.contains_key(&product_id) {
            return Err(DomainError::conflict(format!(
                "ledger already exists for product {product_id}"
            )));
        }
        let key = ledger.sku().map(sku_key);
        if let Some(key) = &key {
            self.ensure_sku_free(&index, key, product_id)?;
        }

        self.publish(product_id, ledger.version(), &events);

        let shared = Arc::new(SharedLedger::new(ledger));
        index.ledgers.insert(product_id, Arc::clone(&shared));
        if let Some(key) = key {
            index.link_sku(key, product_id);
        }

        tracing::info!(
            product_id = %product_id,
            ledgers = index.ledgers.len(),
            "stock ledger opened"
        );
        Ok(LedgerView { ledger: shared })
    }

    /// Open a ledger and record an initial on-hand quantity.
    pub fn create_with_stock(
        &self,
        product_id: ProductId,
        settings: LedgerSettings,
        initial_on_hand: i64,
    ) -> DomainResult<LedgerView> {
        if initial_on_hand < 0 {
            return Err(DomainError::invalid_argument("on-hand quantity cannot be negative"));
        }
        let view = self.create(product_id, settings)?;
        if initial_on_hand > 0 {
            self.execute(product_id, &LedgerCommand::set_on_hand(product_id, initial_on_hand))?;
        }
        Ok(view)
    }

    pub fn get(&self, product_id: ProductId) -> DomainResult<LedgerView> {
        self.ledger(product_id).map(|ledger| LedgerView { ledger })
    }

    pub fn contains(&self, product_id: ProductId) -> bool {
        self.read_index().ledgers.contains_key(&product_id)
    }

    /// Ledger carrying `sku`. With uniqueness off and several owners, the
    /// lowest product id wins.
    pub fn find_by_sku(&self, sku: &str) -> Option<LedgerView> {
        let index = self.read_index();
        let product_id = index.skus.get(&sku_key(sku))?.iter().next()?;
        index
            .ledgers
            .get(product_id)
            .cloned()
            .map(|ledger| LedgerView { ledger })
    }

    /// All tracked goods, sorted.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<_> = self.read_index().ledgers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read_index().ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a command against one ledger and publish the resulting events.
    ///
    /// Publication happens inside the ledger's critical section, so envelopes
    /// for one good leave in version order. A failed publish is logged; the
    /// committed state stands.
    pub fn execute(
        &self,
        product_id: ProductId,
        command: &LedgerCommand,
    ) -> DomainResult<Vec<LedgerEvent>> {
        let ledger = self.ledger(product_id)?;
        let (events, ()) = ledger.execute_then(command, |events, state| {
            self.publish(product_id, state.version(), events);
        })?;
        Ok(events)
    }

    /// Fulfillment: hold units for a placed order.
    pub fn reserve_stock(&self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        self.execute(product_id, &LedgerCommand::reserve_stock(product_id, quantity))
            .map(|_| ())
    }

    /// Fulfillment: give back units of a cancelled order.
    pub fn release_stock(&self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        self.execute(product_id, &LedgerCommand::release_stock(product_id, quantity))
            .map(|_| ())
    }

    /// Fulfillment: ship a reserved order.
    pub fn ship(&self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        self.execute(
            product_id,
            &LedgerCommand::remove_stock(product_id, quantity, true),
        )
        .map(|_| ())
    }

    /// Replenishment: receive new units.
    pub fn receive(&self, product_id: ProductId, quantity: i64) -> DomainResult<()> {
        self.execute(product_id, &LedgerCommand::add_stock(product_id, quantity))
            .map(|_| ())
    }

    /// Change (or clear) a ledger's SKU, keeping the SKU index in step.
    pub fn set_sku(&self, product_id: ProductId, sku: Option<&str>) -> DomainResult<()> {
        let mut index = self.write_index();
        let ledger = index
            .ledgers
            .get(&product_id)
            .cloned()
            .ok_or(DomainError::NotFound)?;

        let new_key = sku.map(sku_key).filter(|k| !k.is_empty());
        if let Some(key) = &new_key {
            self.ensure_sku_free(&index, key, product_id)?;
        }

        let old_key = ledger.update(|state| -> DomainResult<Option<String>> {
            let old = state.sku().map(sku_key);
            state.set_sku(sku)?;
            Ok(old)
        })?;

        if let Some(old) = old_key {
            index.unlink_sku(&old, product_id);
        }
        if let Some(key) = new_key {
            index.link_sku(key, product_id);
        }
        Ok(())
    }

    /// Remove a good's ledger (cascading delete).
    ///
    /// The ledger is closed, so a command already in flight against it fails
    /// with `NotFound`. Returns the final state.
    pub fn remove(&self, product_id: ProductId) -> DomainResult<LedgerSnapshot> {
        let ledger = {
            let mut index = self.write_index();
            let ledger = index
                .ledgers
                .remove(&product_id)
                .ok_or(DomainError::NotFound)?;
            if let Some(key) = ledger.read(|state| state.sku().map(sku_key)) {
                index.unlink_sku(&key, product_id);
            }
            ledger
        };

        let close = LedgerCommand::close(product_id);
        let (_, snapshot) = ledger.execute_then(&close, |events, state| {
            self.publish(product_id, state.version(), events);
            state.snapshot()
        })?;

        tracing::info!(product_id = %product_id, "stock ledger removed");
        Ok(snapshot)
    }

    /// Goods whose ledger currently fails [`StockLedger::validate`].
    pub fn audit(&self) -> Vec<ProductId> {
        let ledgers: Vec<_> = self.read_index().ledgers.values().cloned().collect();
        let mut invalid: Vec<_> = ledgers
            .iter()
            .filter(|ledger| !ledger.validate())
            .map(|ledger| ledger.product_id())
            .collect();
        invalid.sort();
        if !invalid.is_empty() {
            tracing::warn!(count = invalid.len(), "ledgers failing invariant audit");
        }
        invalid
    }

    /// Snapshots of ledgers at or below their reorder level, sorted by product.
    pub fn needing_reorder(&self) -> Vec<LedgerSnapshot> {
        let ledgers: Vec<_> = self.read_index().ledgers.values().cloned().collect();
        let mut low: Vec<_> = ledgers
            .iter()
            .map(|ledger| ledger.snapshot())
            .filter(LedgerSnapshot::needs_reorder)
            .collect();
        low.sort_by_key(|s| s.product_id);
        low
    }

    fn ensure_sku_free(
        &self,
        index: &Index,
        key: &str,
        product_id: ProductId,
    ) -> DomainResult<()> {
        if !self.config.unique_skus {
            return Ok(());
        }
        let owner = index
            .skus
            .get(key)
            .and_then(|owners| owners.iter().find(|owner| **owner != product_id));
        match owner {
            Some(owner) => Err(DomainError::conflict(format!(
                "SKU '{key}' is already assigned to product {owner}"
            ))),
            None => Ok(()),
        }
    }

    /// `version` is the ledger version after the last of `events`.
    fn publish(&self, product_id: ProductId, version: u64, events: &[LedgerEvent]) {
        let first = version + 1 - events.len() as u64;
        for (offset, event) in events.iter().enumerate() {
            let sequence = first + offset as u64;
            let payload = match serde_json::to_value(event) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(
                        product_id = %product_id,
                        error = %err,
                        "ledger event serialization failed"
                    );
                    continue;
                }
            };
            let envelope =
                EventEnvelope::wrap(product_id, sequence, event.clone()).map(|_| payload);
            if let Err(err) = self.bus.publish(envelope) {
                tracing::warn!(
                    product_id = %product_id,
                    sequence,
                    error = ?err,
                    "ledger event publication failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_events::InMemoryEventBus;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn registry() -> LedgerRegistry<Bus> {
        LedgerRegistry::new(RegistryConfig::default(), Arc::new(InMemoryEventBus::new()))
    }

    #[test]
    fn create_opens_ledger_with_configured_defaults() {
        let config = RegistryConfig {
            default_reorder_level: 12,
            default_max_stock_level: 60,
            unique_skus: true,
        };
        let registry = LedgerRegistry::new(config, Arc::new(InMemoryEventBus::new()));
        let product_id = ProductId::new();

        let ledger = registry.create_default(product_id).unwrap();
        let snapshot = ledger.snapshot();

        assert_eq!(snapshot.on_hand, 0);
        assert_eq!(snapshot.reserved, 0);
        assert_eq!(snapshot.reorder_level, 12);
        assert_eq!(snapshot.max_stock_level, 60);
        assert!(registry.contains(product_id));
    }

    #[test]
    fn duplicate_ledger_is_a_conflict() {
        let registry = registry();
        let product_id = ProductId::new();
        registry.create_default(product_id).unwrap();

        let err = registry.create_default(product_id).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_sku_is_rejected_case_insensitively() {
        let registry = registry();
        registry
            .create(ProductId::new(), LedgerSettings::default().sku("MTC-001"))
            .unwrap();

        let err = registry
            .create(ProductId::new(), LedgerSettings::default().sku(" mtc-001 "))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(msg) if msg.contains("SKU")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_sku_allowed_when_uniqueness_disabled() {
        let config = RegistryConfig {
            unique_skus: false,
            ..RegistryConfig::default()
        };
        let registry = LedgerRegistry::new(config, Arc::new(InMemoryEventBus::new()));

        registry.create(ProductId::new(), LedgerSettings::default().sku("DUP")).unwrap();
        registry.create(ProductId::new(), LedgerSettings::default().sku("DUP")).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ledgers_without_sku_never_collide() {
        let registry = registry();
        registry.create_default(ProductId::new()).unwrap();
        registry.create_default(ProductId::new()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn find_by_sku_returns_owner() {
        let registry = registry();
        let product_id = ProductId::new();
        registry
            .create(product_id, LedgerSettings::default().sku("MTC-777"))
            .unwrap();

        let found = registry.find_by_sku("mtc-777").unwrap();
        assert_eq!(found.product_id(), product_id);
        assert!(registry.find_by_sku("MTC-000").is_none());
    }

    #[test]
    fn set_sku_moves_index_entry() {
        let registry = registry();
        let first = ProductId::new();
        let second = ProductId::new();
        registry.create(first, LedgerSettings::default().sku("OLD")).unwrap();
        registry.create(second, LedgerSettings::default().sku("OTHER")).unwrap();

        registry.set_sku(first, Some("NEW")).unwrap();
        assert!(registry.find_by_sku("OLD").is_none());
        assert_eq!(registry.find_by_sku("NEW").unwrap().product_id(), first);

        let err = registry.set_sku(first, Some("other")).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(registry.get(first).unwrap().snapshot().sku.as_deref(), Some("NEW"));

        registry.set_sku(first, None).unwrap();
        assert!(registry.find_by_sku("NEW").is_none());
    }

    #[test]
    fn create_with_stock_records_initial_quantity() {
        let registry = registry();
        let product_id = ProductId::new();

        let ledger = registry
            .create_with_stock(product_id, LedgerSettings::default(), 40)
            .unwrap();

        assert_eq!(ledger.snapshot().on_hand, 40);
        assert!(matches!(
            registry
                .create_with_stock(ProductId::new(), LedgerSettings::default(), -1)
                .unwrap_err(),
            DomainError::InvalidArgument(_)
        ));
    }

    #[test]
    fn remove_cascades_and_leaves_views_read_only() {
        let registry = registry();
        let product_id = ProductId::new();
        let stale = registry
            .create_with_stock(product_id, LedgerSettings::default().sku("GONE"), 10)
            .unwrap();

        let last = registry.remove(product_id).unwrap();
        assert_eq!(last.on_hand, 10);

        assert!(!registry.contains(product_id));
        assert!(registry.find_by_sku("GONE").is_none());
        assert_eq!(registry.get(product_id).unwrap_err(), DomainError::NotFound);
        assert_eq!(registry.reserve_stock(product_id, 1).unwrap_err(), DomainError::NotFound);
        assert_eq!(registry.remove(product_id).unwrap_err(), DomainError::NotFound);
        assert_eq!(stale.snapshot(), last);

        // SKU is free again.
        registry
            .create(ProductId::new(), LedgerSettings::default().sku("GONE"))
            .unwrap();
    }

    #[test]
    fn shared_sku_survives_removal_of_one_owner() {
        let config = RegistryConfig {
            unique_skus: false,
            ..RegistryConfig::default()
        };
        let registry = LedgerRegistry::new(config, Arc::new(InMemoryEventBus::new()));
        let first = ProductId::new();
        let second = ProductId::new();
        registry.create(first, LedgerSettings::default().sku("DUP")).unwrap();
        registry.create(second, LedgerSettings::default().sku("dup")).unwrap();

        registry.remove(second).unwrap();
        assert_eq!(registry.find_by_sku("DUP").unwrap().product_id(), first);

        let third = ProductId::new();
        registry.create(third, LedgerSettings::default().sku("DUP")).unwrap();
        registry.set_sku(third, Some("MOVED")).unwrap();
        assert_eq!(registry.find_by_sku("DUP").unwrap().product_id(), first);
        assert_eq!(registry.find_by_sku("MOVED").unwrap().product_id(), third);

        registry.set_sku(first, None).unwrap();
        assert!(registry.find_by_sku("DUP").is_none());
    }

    #[test]
    fn duplicate_owners_resolve_to_lowest_product_id() {
        let config = RegistryConfig {
            unique_skus: false,
            ..RegistryConfig::default()
        };
        let registry = LedgerRegistry::new(config, Arc::new(InMemoryEventBus::new()));
        let mut ids = vec![ProductId::new(), ProductId::new(), ProductId::new()];
        for id in &ids {
            registry.create(*id, LedgerSettings::default().sku("SAME")).unwrap();
        }
        ids.sort();

        assert_eq!(registry.find_by_sku("same").unwrap().product_id(), ids[0]);
        registry.remove(ids[0]).unwrap();
        assert_eq!(registry.find_by_sku("same").unwrap().product_id(), ids[1]);
    }

    #[test]
    fn view_tracks_changes_made_through_registry() {
        let registry = registry();
        let sub = registry.bus().subscribe();
        let product_id = ProductId::new();
        let view = registry
            .create_with_stock(product_id, LedgerSettings::default(), 10)
            .unwrap();

        registry.reserve_stock(product_id, 3).unwrap();
        registry.reserve_stock(product_id, 1).unwrap();

        assert_eq!(view.snapshot().reserved, 4);
        assert_eq!(view.available(), 6);
        assert!(view.in_stock());
        assert!(view.validate());

        let sequences: Vec<u64> = sub.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(sequences, (1..=view.version()).collect::<Vec<_>>());
    }

    #[test]
    fn execute_on_unknown_product_is_not_found() {
        let registry = registry();
        let product_id = ProductId::new();
        let err = registry.reserve_stock(product_id, 1).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn published_envelopes_follow_ledger_versions() {
        let registry = registry();
        let sub = registry.bus().subscribe();
        let product_id = ProductId::new();

        registry.create_with_stock(product_id, LedgerSettings::default(), 20).unwrap();
        registry.reserve_stock(product_id, 5).unwrap();
        assert!(registry.reserve_stock(product_id, 50).is_err());
        registry.ship(product_id, 5).unwrap();

        let envelopes = sub.drain();
        let sequences: Vec<u64> = envelopes.iter().map(|e| e.sequence_number()).collect();
        let types: Vec<&str> = envelopes.iter().map(|e| e.event_type()).collect();

        assert_eq!(sequences, vec![1, 2, 3, 4]);
        assert_eq!(
            types,
            vec![
                "inventory.ledger.opened",
                "inventory.ledger.on_hand_set",
                "inventory.ledger.stock_reserved",
                "inventory.ledger.stock_removed",
            ]
        );
        assert!(envelopes.iter().all(|e| e.product_id() == product_id));
    }

    #[test]
    fn audit_flags_reorder_above_max() {
        let registry = registry();
        let healthy = ProductId::new();
        let skewed = ProductId::new();
        registry.create_default(healthy).unwrap();
        registry.create_default(skewed).unwrap();

        registry
            .execute(skewed, &LedgerCommand::set_reorder_level(skewed, 500))
            .unwrap();

        assert_eq!(registry.audit(), vec![skewed]);
    }

    #[test]
    fn needing_reorder_lists_low_ledgers() {
        let registry = registry();
        let low = ProductId::new();
        let stocked = ProductId::new();
        registry.create_with_stock(low, LedgerSettings::default(), 3).unwrap();
        registry.create_with_stock(stocked, LedgerSettings::default(), 30).unwrap();

        let flagged: Vec<_> = registry
            .needing_reorder()
            .into_iter()
            .map(|s| s.product_id)
            .collect();
        assert_eq!(flagged, vec![low]);

        registry.receive(low, 10).unwrap();
        assert!(registry.needing_reorder().is_empty());
    }
}
