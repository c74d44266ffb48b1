//! Projection implementations (read model builders).
//!
//! Projections consume published ledger envelopes and build query-optimized
//! read models. They are:
//! - **Rebuildable**: reconstructed from the envelope stream on demand
//! - **Idempotent**: safe for at-least-once delivery

pub mod reorder;

pub use reorder::{ProjectionError, ReorderProjection, StockLevel};
