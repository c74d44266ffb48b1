//! Stock-reservation ledger (event-sourced).
//!
//! One [`StockLedger`] per tracked good: on-hand and reserved counters plus the
//! reorder/max thresholds, with every mutation expressed as a command that is
//! either rejected outright or applied as a single event. [`SharedLedger`]
//! wraps a ledger for concurrent callers.
//!
//! Pure domain logic: no IO, no storage.

pub mod ledger;
pub mod settings;
pub mod shared;

pub use ledger::{
    AddStock, CloseLedger, LedgerClosed, LedgerCommand, LedgerEvent, LedgerOpened,
    LedgerSnapshot, MaxStockLevelSet, OnHandSet, OpenLedger, ReleaseStock, RemoveStock,
    ReorderLevelSet, ReserveStock, SetMaxStockLevel, SetOnHand, SetReorderLevel,
    SetThresholds, StockAdded, StockLedger, StockReleased, StockRemoved, StockReserved,
    ThresholdsSet,
};
pub use settings::{
    DEFAULT_MAX_STOCK_LEVEL, DEFAULT_REORDER_LEVEL, LedgerSettings, MAX_NOTES_LEN,
    MAX_SKU_LEN, MAX_STORAGE_LOCATION_LEN,
};
pub use shared::SharedLedger;
