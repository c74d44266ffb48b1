//! Thread-safe ledger handle.
//!
//! The whole ledger sits behind one mutex, so each command's check and its
//! state change happen in a single critical section. The section does no IO and
//! no waiting, which keeps every call bounded.

use std::sync::{Mutex, MutexGuard, PoisonError};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ProductId};

use crate::ledger::{LedgerCommand, LedgerEvent, LedgerSnapshot, StockLedger};

/// A stock ledger shared between concurrent order and replenishment workflows.
///
/// Operations are linearizable per instance. Separate instances share nothing.
#[derive(Debug)]
pub struct SharedLedger {
    product_id: ProductId,
    inner: Mutex<StockLedger>,
}

impl SharedLedger {
    pub fn new(ledger: StockLedger) -> Self {
        Self {
            product_id: ledger.product_id(),
            inner: Mutex::new(ledger),
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    // `apply` cannot fail half-way, so a poisoned guard still holds a consistent ledger.
    fn lock(&self) -> MutexGuard<'_, StockLedger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a command atomically and return the events it produced.
    pub fn execute(&self, command: &LedgerCommand) -> DomainResult<Vec<LedgerEvent>> {
        self.execute_then(command, |_, _| ())
            .map(|(events, ())| events)
    }

    /// Run a command and, still inside the critical section, hand the produced
    /// events and resulting state to `after`.
    ///
    /// `after` runs only on success and must not call back into this ledger.
    pub fn execute_then<F, R>(
        &self,
        command: &LedgerCommand,
        after: F,
    ) -> DomainResult<(Vec<LedgerEvent>, R)>
    where
        F: FnOnce(&[LedgerEvent], &StockLedger) -> R,
    {
        let mut ledger = self.lock();

        match ledger.execute(command) {
            Ok(events) => {
                tracing::debug!(
                    product_id = %self.product_id,
                    command = command.name(),
                    on_hand = ledger.on_hand(),
                    reserved = ledger.reserved(),
                    version = ledger.version(),
                    "ledger command applied"
                );
                if !ledger.validate() {
                    tracing::warn!(
                        product_id = %self.product_id,
                        reorder_level = ledger.reorder_level(),
                        max_stock_level = ledger.max_stock_level(),
                        "reorder level exceeds max stock level"
                    );
                }
                let out = after(&events, &*ledger);
                Ok((events, out))
            }
            Err(err) => {
                match &err {
                    DomainError::InsufficientStock { requested, available } => tracing::info!(
                        product_id = %self.product_id,
                        command = command.name(),
                        requested,
                        available,
                        "stock request exceeds holdings"
                    ),
                    _ => tracing::warn!(
                        product_id = %self.product_id,
                        command = command.name(),
                        kind = err.kind(),
                        error = %err,
                        "ledger command rejected"
                    ),
                }
                Err(err)
            }
        }
    }

    /// Read the ledger under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&StockLedger) -> R) -> R {
        let guard = self.lock();
        f(&*guard)
    }

    /// Apply a non-counter change (descriptive metadata) under the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut StockLedger) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read(StockLedger::snapshot)
    }

    pub fn set_on_hand(&self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_on_hand(self.product_id, value))
    }

    pub fn set_reorder_level(&self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_reorder_level(self.product_id, value))
    }

    pub fn set_max_stock_level(&self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_max_stock_level(self.product_id, value))
    }

    pub fn set_thresholds(&self, reorder_level: i64, max_stock_level: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_thresholds(
            self.product_id,
            reorder_level,
            max_stock_level,
        ))
    }

    pub fn reserve_stock(&self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::reserve_stock(self.product_id, quantity))
    }

    pub fn release_stock(&self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::release_stock(self.product_id, quantity))
    }

    pub fn add_stock(&self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::add_stock(self.product_id, quantity))
    }

    pub fn remove_stock(&self, quantity: i64, reduce_reserved: bool) -> DomainResult<()> {
        self.run(LedgerCommand::remove_stock(
            self.product_id,
            quantity,
            reduce_reserved,
        ))
    }

    pub fn available(&self) -> i64 {
        self.read(StockLedger::available)
    }

    pub fn in_stock(&self) -> bool {
        self.read(StockLedger::in_stock)
    }

    pub fn needs_reorder(&self) -> bool {
        self.read(StockLedger::needs_reorder)
    }

    pub fn validate(&self) -> bool {
        self.read(StockLedger::validate)
    }

    fn run(&self, command: LedgerCommand) -> DomainResult<()> {
        self.execute(&command).map(|_| ())
    }
}
