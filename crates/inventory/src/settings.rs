//! Creation-time configuration for a stock ledger.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

pub const DEFAULT_REORDER_LEVEL: i64 = 5;
pub const DEFAULT_MAX_STOCK_LEVEL: i64 = 100;

pub const MAX_SKU_LEN: usize = 50;
pub const MAX_STORAGE_LOCATION_LEN: usize = 100;
pub const MAX_NOTES_LEN: usize = 500;

/// Thresholds and descriptive attributes a ledger is opened with.
///
/// Counters always start at zero; only the thresholds are caller-overridable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub sku: Option<String>,
    pub storage_location: Option<String>,
    pub notes: Option<String>,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            reorder_level: DEFAULT_REORDER_LEVEL,
            max_stock_level: DEFAULT_MAX_STOCK_LEVEL,
            sku: None,
            storage_location: None,
            notes: None,
        }
    }
}

impl LedgerSettings {
    pub fn with_thresholds(reorder_level: i64, max_stock_level: i64) -> Self {
        Self {
            reorder_level,
            max_stock_level,
            ..Self::default()
        }
    }

    pub fn sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn storage_location(mut self, location: impl Into<String>) -> Self {
        self.storage_location = Some(location.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Check thresholds jointly and metadata lengths.
    pub fn validate(&self) -> DomainResult<()> {
        check_thresholds(self.reorder_level, self.max_stock_level)?;
        normalize_text(self.sku.as_deref(), MAX_SKU_LEN, "SKU")?;
        normalize_text(
            self.storage_location.as_deref(),
            MAX_STORAGE_LOCATION_LEN,
            "storage location",
        )?;
        normalize_text(self.notes.as_deref(), MAX_NOTES_LEN, "notes")?;
        Ok(())
    }

    /// Validated copy with blank metadata collapsed to `None` and text trimmed.
    pub fn normalized(&self) -> DomainResult<Self> {
        check_thresholds(self.reorder_level, self.max_stock_level)?;
        Ok(Self {
            reorder_level: self.reorder_level,
            max_stock_level: self.max_stock_level,
            sku: normalize_text(self.sku.as_deref(), MAX_SKU_LEN, "SKU")?,
            storage_location: normalize_text(
                self.storage_location.as_deref(),
                MAX_STORAGE_LOCATION_LEN,
                "storage location",
            )?,
            notes: normalize_text(self.notes.as_deref(), MAX_NOTES_LEN, "notes")?,
        })
    }
}

/// Joint threshold check: both non-negative, max not below reorder.
pub(crate) fn check_thresholds(reorder_level: i64, max_stock_level: i64) -> DomainResult<()> {
    if reorder_level < 0 {
        return Err(DomainError::invalid_argument("reorder level cannot be negative"));
    }
    if max_stock_level < 0 {
        return Err(DomainError::invalid_argument("max stock level cannot be negative"));
    }
    if max_stock_level < reorder_level {
        return Err(DomainError::invalid_state(
            "max stock level cannot be less than reorder level",
        ));
    }
    Ok(())
}

pub(crate) fn normalize_text(
    value: Option<&str>,
    max_len: usize,
    field: &str,
) -> DomainResult<Option<String>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_len {
        return Err(DomainError::invalid_argument(format!(
            "{field} cannot exceed {max_len} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}
