//! Infrastructure layer: configuration, the ledger registry and read models.

pub mod config;
pub mod projections;
pub mod registry;


pub use config::{ConfigError, RegistryConfig};
pub use projections::{ProjectionError, ReorderProjection, StockLevel};
pub use registry::{LedgerRegistry, LedgerView};
