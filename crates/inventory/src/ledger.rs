use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ProductId};
use stockledger_events::Event;

use crate::settings::{
    LedgerSettings, MAX_NOTES_LEN, MAX_SKU_LEN, MAX_STORAGE_LOCATION_LEN, check_thresholds,
    normalize_text,
};

/// Aggregate root: StockLedger.
///
/// Tracks physical units held (`on_hand`), units committed to pending orders
/// (`reserved`) and the replenishment thresholds for one good.
///
/// Invariants after every successful command:
/// - `on_hand >= 0`, `reserved >= 0`, `reserved <= on_hand`
/// - `reorder_level >= 0`
/// - `max_stock_level >= reorder_level`, except after `SetReorderLevel`,
///   which intentionally does not look at the max (see [`StockLedger::validate`])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLedger {
    product_id: ProductId,
    sku: Option<String>,
    storage_location: Option<String>,
    notes: Option<String>,
    on_hand: i64,
    reserved: i64,
    reorder_level: i64,
    max_stock_level: i64,
    last_updated: DateTime<Utc>,
    version: u64,
    opened: bool,
    closed: bool,
}

impl StockLedger {
    /// Create an empty, not-yet-opened ledger for rehydration.
    pub fn empty(product_id: ProductId) -> Self {
        let defaults = LedgerSettings::default();
        Self {
            product_id,
            sku: None,
            storage_location: None,
            notes: None,
            on_hand: 0,
            reserved: 0,
            reorder_level: defaults.reorder_level,
            max_stock_level: defaults.max_stock_level,
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            opened: false,
            closed: false,
        }
    }

    /// Open a ledger for a newly tracked good with zeroed counters.
    pub fn open(product_id: ProductId, settings: LedgerSettings) -> DomainResult<Self> {
        let mut ledger = Self::empty(product_id);
        ledger.execute(&LedgerCommand::open(product_id, settings))?;
        Ok(ledger)
    }

    /// Open a ledger with the default thresholds.
    pub fn new(product_id: ProductId) -> Self {
        let mut ledger = Self::empty(product_id);
        let event = LedgerEvent::LedgerOpened(LedgerOpened {
            product_id,
            settings: LedgerSettings::default(),
            occurred_at: Utc::now(),
        });
        ledger.apply(&event);
        ledger
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn sku(&self) -> Option<&str> {
        self.sku.as_deref()
    }

    pub fn storage_location(&self) -> Option<&str> {
        self.storage_location.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn reorder_level(&self) -> i64 {
        self.reorder_level
    }

    pub fn max_stock_level(&self) -> i64 {
        self.max_stock_level
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_open(&self) -> bool {
        self.opened && !self.closed
    }

    /// Units that can still be newly reserved.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn in_stock(&self) -> bool {
        self.available() > 0
    }

    /// Replenishment signal: on-hand at or below the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.on_hand <= self.reorder_level
    }

    /// True iff every ledger invariant holds.
    ///
    /// A diagnostic for state loaded through [`StockLedger::restore_unchecked`]
    /// or left behind by `set_reorder_level`; it never gates commands.
    pub fn validate(&self) -> bool {
        self.on_hand >= 0
            && self.reserved >= 0
            && self.reserved <= self.on_hand
            && self.reorder_level >= 0
            && self.max_stock_level >= self.reorder_level
    }

    pub fn set_on_hand(&mut self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_on_hand(self.product_id, value))
    }

    pub fn set_reorder_level(&mut self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_reorder_level(self.product_id, value))
    }

    pub fn set_max_stock_level(&mut self, value: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_max_stock_level(self.product_id, value))
    }

    /// Set both thresholds, validated together.
    pub fn set_thresholds(&mut self, reorder_level: i64, max_stock_level: i64) -> DomainResult<()> {
        self.run(LedgerCommand::set_thresholds(
            self.product_id,
            reorder_level,
            max_stock_level,
        ))
    }

    pub fn reserve_stock(&mut self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::reserve_stock(self.product_id, quantity))
    }

    pub fn release_stock(&mut self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::release_stock(self.product_id, quantity))
    }

    pub fn add_stock(&mut self, quantity: i64) -> DomainResult<()> {
        self.run(LedgerCommand::add_stock(self.product_id, quantity))
    }

    /// Remove physical stock, optionally consuming reservations.
    ///
    /// With `reduce_reserved`, `reserved` drops by `min(reserved, quantity)`.
    pub fn remove_stock(&mut self, quantity: i64, reduce_reserved: bool) -> DomainResult<()> {
        self.run(LedgerCommand::remove_stock(
            self.product_id,
            quantity,
            reduce_reserved,
        ))
    }

    pub fn set_sku(&mut self, sku: Option<&str>) -> DomainResult<()> {
        self.sku = normalize_text(sku, MAX_SKU_LEN, "SKU")?;
        Ok(())
    }

    pub fn set_storage_location(&mut self, location: Option<&str>) -> DomainResult<()> {
        self.storage_location =
            normalize_text(location, MAX_STORAGE_LOCATION_LEN, "storage location")?;
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Option<&str>) -> DomainResult<()> {
        self.notes = normalize_text(notes, MAX_NOTES_LEN, "notes")?;
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            product_id: self.product_id,
            sku: self.sku.clone(),
            storage_location: self.storage_location.clone(),
            notes: self.notes.clone(),
            on_hand: self.on_hand,
            reserved: self.reserved,
            reorder_level: self.reorder_level,
            max_stock_level: self.max_stock_level,
            last_updated: self.last_updated,
            version: self.version,
        }
    }

    /// Load a ledger from stored values without checking any invariant.
    ///
    /// Callers are expected to run [`StockLedger::validate`] afterwards.
    pub fn restore_unchecked(snapshot: LedgerSnapshot) -> Self {
        Self {
            product_id: snapshot.product_id,
            sku: snapshot.sku,
            storage_location: snapshot.storage_location,
            notes: snapshot.notes,
            on_hand: snapshot.on_hand,
            reserved: snapshot.reserved,
            reorder_level: snapshot.reorder_level,
            max_stock_level: snapshot.max_stock_level,
            last_updated: snapshot.last_updated,
            version: snapshot.version,
            opened: true,
            closed: false,
        }
    }

    fn run(&mut self, command: LedgerCommand) -> DomainResult<()> {
        self.execute(&command).map(|_| ())
    }
}

impl AggregateRoot for StockLedger {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Point-in-time copy of a ledger, suitable for storage or display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub storage_location: Option<String>,
    pub notes: Option<String>,
    pub on_hand: i64,
    pub reserved: i64,
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub last_updated: DateTime<Utc>,
    pub version: u64,
}

impl LedgerSnapshot {
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn in_stock(&self) -> bool {
        self.available() > 0
    }

    pub fn needs_reorder(&self) -> bool {
        self.on_hand <= self.reorder_level
    }
}

/// Command: OpenLedger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLedger {
    pub product_id: ProductId,
    pub settings: LedgerSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseLedger (the tracked good was removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseLedger {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetOnHand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetOnHand {
    pub product_id: ProductId,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetReorderLevel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReorderLevel {
    pub product_id: ProductId,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetMaxStockLevel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMaxStockLevel {
    pub product_id: ProductId,
    pub value: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetThresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetThresholds {
    pub product_id: ProductId,
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reduce_reserved: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    OpenLedger(OpenLedger),
    CloseLedger(CloseLedger),
    SetOnHand(SetOnHand),
    SetReorderLevel(SetReorderLevel),
    SetMaxStockLevel(SetMaxStockLevel),
    SetThresholds(SetThresholds),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    AddStock(AddStock),
    RemoveStock(RemoveStock),
}

// Constructors stamp `occurred_at` with the current time.
impl LedgerCommand {
    pub fn open(product_id: ProductId, settings: LedgerSettings) -> Self {
        Self::OpenLedger(OpenLedger {
            product_id,
            settings,
            occurred_at: Utc::now(),
        })
    }

    pub fn close(product_id: ProductId) -> Self {
        Self::CloseLedger(CloseLedger {
            product_id,
            occurred_at: Utc::now(),
        })
    }

    pub fn set_on_hand(product_id: ProductId, value: i64) -> Self {
        Self::SetOnHand(SetOnHand {
            product_id,
            value,
            occurred_at: Utc::now(),
        })
    }

    pub fn set_reorder_level(product_id: ProductId, value: i64) -> Self {
        Self::SetReorderLevel(SetReorderLevel {
            product_id,
            value,
            occurred_at: Utc::now(),
        })
    }

    pub fn set_max_stock_level(product_id: ProductId, value: i64) -> Self {
        Self::SetMaxStockLevel(SetMaxStockLevel {
            product_id,
            value,
            occurred_at: Utc::now(),
        })
    }

    pub fn set_thresholds(product_id: ProductId, reorder_level: i64, max_stock_level: i64) -> Self {
        Self::SetThresholds(SetThresholds {
            product_id,
            reorder_level,
            max_stock_level,
            occurred_at: Utc::now(),
        })
    }

    pub fn reserve_stock(product_id: ProductId, quantity: i64) -> Self {
        Self::ReserveStock(ReserveStock {
            product_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    pub fn release_stock(product_id: ProductId, quantity: i64) -> Self {
        Self::ReleaseStock(ReleaseStock {
            product_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    pub fn add_stock(product_id: ProductId, quantity: i64) -> Self {
        Self::AddStock(AddStock {
            product_id,
            quantity,
            occurred_at: Utc::now(),
        })
    }

    pub fn remove_stock(product_id: ProductId, quantity: i64, reduce_reserved: bool) -> Self {
        Self::RemoveStock(RemoveStock {
            product_id,
            quantity,
            reduce_reserved,
            occurred_at: Utc::now(),
        })
    }

    pub fn product_id(&self) -> ProductId {
        match self {
            LedgerCommand::OpenLedger(c) => c.product_id,
            LedgerCommand::CloseLedger(c) => c.product_id,
            LedgerCommand::SetOnHand(c) => c.product_id,
            LedgerCommand::SetReorderLevel(c) => c.product_id,
            LedgerCommand::SetMaxStockLevel(c) => c.product_id,
            LedgerCommand::SetThresholds(c) => c.product_id,
            LedgerCommand::ReserveStock(c) => c.product_id,
            LedgerCommand::ReleaseStock(c) => c.product_id,
            LedgerCommand::AddStock(c) => c.product_id,
            LedgerCommand::RemoveStock(c) => c.product_id,
        }
    }

    /// Short name used in log records.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCommand::OpenLedger(_) => "open_ledger",
            LedgerCommand::CloseLedger(_) => "close_ledger",
            LedgerCommand::SetOnHand(_) => "set_on_hand",
            LedgerCommand::SetReorderLevel(_) => "set_reorder_level",
            LedgerCommand::SetMaxStockLevel(_) => "set_max_stock_level",
            LedgerCommand::SetThresholds(_) => "set_thresholds",
            LedgerCommand::ReserveStock(_) => "reserve_stock",
            LedgerCommand::ReleaseStock(_) => "release_stock",
            LedgerCommand::AddStock(_) => "add_stock",
            LedgerCommand::RemoveStock(_) => "remove_stock",
        }
    }
}

/// Event: LedgerOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOpened {
    pub product_id: ProductId,
    pub settings: LedgerSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LedgerClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerClosed {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OnHandSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnHandSet {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReorderLevelSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderLevelSet {
    pub product_id: ProductId,
    pub reorder_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaxStockLevelSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxStockLevelSet {
    pub product_id: ProductId,
    pub max_stock_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ThresholdsSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsSet {
    pub product_id: ProductId,
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdded {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockRemoved.
///
/// `reserved_reduction` is decided by `handle`, so on-hand and reserved move
/// together in one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRemoved {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved_reduction: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    LedgerOpened(LedgerOpened),
    LedgerClosed(LedgerClosed),
    OnHandSet(OnHandSet),
    ReorderLevelSet(ReorderLevelSet),
    MaxStockLevelSet(MaxStockLevelSet),
    ThresholdsSet(ThresholdsSet),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    StockAdded(StockAdded),
    StockRemoved(StockRemoved),
}

impl LedgerEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            LedgerEvent::LedgerOpened(e) => e.product_id,
            LedgerEvent::LedgerClosed(e) => e.product_id,
            LedgerEvent::OnHandSet(e) => e.product_id,
            LedgerEvent::ReorderLevelSet(e) => e.product_id,
            LedgerEvent::MaxStockLevelSet(e) => e.product_id,
            LedgerEvent::ThresholdsSet(e) => e.product_id,
            LedgerEvent::StockReserved(e) => e.product_id,
            LedgerEvent::StockReleased(e) => e.product_id,
            LedgerEvent::StockAdded(e) => e.product_id,
            LedgerEvent::StockRemoved(e) => e.product_id,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::LedgerOpened(_) => "inventory.ledger.opened",
            LedgerEvent::LedgerClosed(_) => "inventory.ledger.closed",
            LedgerEvent::OnHandSet(_) => "inventory.ledger.on_hand_set",
            LedgerEvent::ReorderLevelSet(_) => "inventory.ledger.reorder_level_set",
            LedgerEvent::MaxStockLevelSet(_) => "inventory.ledger.max_stock_level_set",
            LedgerEvent::ThresholdsSet(_) => "inventory.ledger.thresholds_set",
            LedgerEvent::StockReserved(_) => "inventory.ledger.stock_reserved",
            LedgerEvent::StockReleased(_) => "inventory.ledger.stock_released",
            LedgerEvent::StockAdded(_) => "inventory.ledger.stock_added",
            LedgerEvent::StockRemoved(_) => "inventory.ledger.stock_removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::LedgerOpened(e) => e.occurred_at,
            LedgerEvent::LedgerClosed(e) => e.occurred_at,
            LedgerEvent::OnHandSet(e) => e.occurred_at,
            LedgerEvent::ReorderLevelSet(e) => e.occurred_at,
            LedgerEvent::MaxStockLevelSet(e) => e.occurred_at,
            LedgerEvent::ThresholdsSet(e) => e.occurred_at,
            LedgerEvent::StockReserved(e) => e.occurred_at,
            LedgerEvent::StockReleased(e) => e.occurred_at,
            LedgerEvent::StockAdded(e) => e.occurred_at,
            LedgerEvent::StockRemoved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockLedger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::LedgerOpened(e) => {
                self.product_id = e.product_id;
                self.sku = e.settings.sku.clone();
                self.storage_location = e.settings.storage_location.clone();
                self.notes = e.settings.notes.clone();
                self.on_hand = 0;
                self.reserved = 0;
                self.reorder_level = e.settings.reorder_level;
                self.max_stock_level = e.settings.max_stock_level;
                self.opened = true;
            }
            LedgerEvent::LedgerClosed(_) => {
                self.closed = true;
            }
            LedgerEvent::OnHandSet(e) => {
                self.on_hand = e.on_hand;
            }
            LedgerEvent::ReorderLevelSet(e) => {
                self.reorder_level = e.reorder_level;
            }
            LedgerEvent::MaxStockLevelSet(e) => {
                self.max_stock_level = e.max_stock_level;
            }
            LedgerEvent::ThresholdsSet(e) => {
                self.reorder_level = e.reorder_level;
                self.max_stock_level = e.max_stock_level;
            }
            LedgerEvent::StockReserved(e) => {
                self.reserved += e.quantity;
            }
            LedgerEvent::StockReleased(e) => {
                self.reserved -= e.quantity;
            }
            LedgerEvent::StockAdded(e) => {
                self.on_hand += e.quantity;
            }
            LedgerEvent::StockRemoved(e) => {
                self.on_hand -= e.quantity;
                self.reserved -= e.reserved_reduction;
            }
        }

        if !matches!(event, LedgerEvent::LedgerClosed(_)) {
            self.last_updated = event.occurred_at();
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if let LedgerCommand::OpenLedger(cmd) = command {
            return self.handle_open(cmd);
        }

        self.ensure_open()?;
        self.ensure_product_id(command.product_id())?;

        match command {
            LedgerCommand::OpenLedger(cmd) => self.handle_open(cmd),
            LedgerCommand::CloseLedger(cmd) => Ok(vec![LedgerEvent::LedgerClosed(LedgerClosed {
                product_id: cmd.product_id,
                occurred_at: cmd.occurred_at,
            })]),
            LedgerCommand::SetOnHand(cmd) => self.handle_set_on_hand(cmd),
            LedgerCommand::SetReorderLevel(cmd) => self.handle_set_reorder_level(cmd),
            LedgerCommand::SetMaxStockLevel(cmd) => self.handle_set_max_stock_level(cmd),
            LedgerCommand::SetThresholds(cmd) => self.handle_set_thresholds(cmd),
            LedgerCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            LedgerCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            LedgerCommand::AddStock(cmd) => self.handle_add(cmd),
            LedgerCommand::RemoveStock(cmd) => self.handle_remove(cmd),
        }
    }
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::invalid_argument("quantity must be positive"));
    }
    Ok(())
}

impl StockLedger {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.product_id != product_id {
            return Err(DomainError::invalid_state("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenLedger) -> Result<Vec<LedgerEvent>, DomainError> {
        if self.opened {
            return Err(DomainError::conflict("ledger already opened"));
        }
        self.ensure_product_id(cmd.product_id)?;
        let settings = cmd.settings.normalized()?;

        Ok(vec![LedgerEvent::LedgerOpened(LedgerOpened {
            product_id: cmd.product_id,
            settings,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_on_hand(&self, cmd: &SetOnHand) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.value < 0 {
            return Err(DomainError::invalid_argument("on-hand quantity cannot be negative"));
        }
        if cmd.value < self.reserved {
            return Err(DomainError::invalid_state(format!(
                "on-hand quantity cannot be less than reserved quantity (reserved: {}, requested: {})",
                self.reserved, cmd.value
            )));
        }

        Ok(vec![LedgerEvent::OnHandSet(OnHandSet {
            product_id: cmd.product_id,
            on_hand: cmd.value,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_reorder_level(
        &self,
        cmd: &SetReorderLevel,
    ) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.value < 0 {
            return Err(DomainError::invalid_argument("reorder level cannot be negative"));
        }

        Ok(vec![LedgerEvent::ReorderLevelSet(ReorderLevelSet {
            product_id: cmd.product_id,
            reorder_level: cmd.value,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_max_stock_level(
        &self,
        cmd: &SetMaxStockLevel,
    ) -> Result<Vec<LedgerEvent>, DomainError> {
        if cmd.value < 0 {
            return Err(DomainError::invalid_argument("max stock level cannot be negative"));
        }
        if cmd.value < self.reorder_level {
            return Err(DomainError::invalid_state(
                "max stock level cannot be less than reorder level",
            ));
        }

        Ok(vec![LedgerEvent::MaxStockLevelSet(MaxStockLevelSet {
            product_id: cmd.product_id,
            max_stock_level: cmd.value,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_thresholds(&self, cmd: &SetThresholds) -> Result<Vec<LedgerEvent>, DomainError> {
        check_thresholds(cmd.reorder_level, cmd.max_stock_level)?;

        Ok(vec![LedgerEvent::ThresholdsSet(ThresholdsSet {
            product_id: cmd.product_id,
            reorder_level: cmd.reorder_level,
            max_stock_level: cmd.max_stock_level,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<LedgerEvent>, DomainError> {
        ensure_positive(cmd.quantity)?;

        let available = self.available();
        if available < cmd.quantity {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        Ok(vec![LedgerEvent::StockReserved(StockReserved {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<LedgerEvent>, DomainError> {
        ensure_positive(cmd.quantity)?;

        if self.reserved < cmd.quantity {
            return Err(DomainError::invalid_state(format!(
                "cannot release more than reserved (reserved: {}, requested: {})",
                self.reserved, cmd.quantity
            )));
        }

        Ok(vec![LedgerEvent::StockReleased(StockReleased {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add(&self, cmd: &AddStock) -> Result<Vec<LedgerEvent>, DomainError> {
        ensure_positive(cmd.quantity)?;

        if self.on_hand.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::invalid_argument("quantity overflows on-hand quantity"));
        }

        Ok(vec![LedgerEvent::StockAdded(StockAdded {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveStock) -> Result<Vec<LedgerEvent>, DomainError> {
        ensure_positive(cmd.quantity)?;

        if self.on_hand < cmd.quantity {
            return Err(DomainError::insufficient_stock(cmd.quantity, self.on_hand));
        }

        let reserved_reduction = if cmd.reduce_reserved {
            self.reserved.min(cmd.quantity)
        } else {
            0
        };

        // Checked against the final state only; on-hand and reserved move together.
        let on_hand = self.on_hand - cmd.quantity;
        let reserved = self.reserved - reserved_reduction;
        if reserved > on_hand {
            return Err(DomainError::invalid_state(format!(
                "removal would leave reserved above on-hand (reserved: {reserved}, on hand: {on_hand})"
            )));
        }

        Ok(vec![LedgerEvent::StockRemoved(StockRemoved {
            product_id: cmd.product_id,
            quantity: cmd.quantity,
            reserved_reduction,
            occurred_at: cmd.occurred_at,
        })])
    }
}
