use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gemledger_core::{Carats, DomainResult, Money, PacketId, ReferenceId, SourceItemId, WarehouseId};

/// Layer identifier. Allocated from a monotonic sequence, so it doubles as the
/// FIFO tie-breaker for layers created at the same instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl core::fmt::Display for LayerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Which kind of operation produced a layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceKind {
    Receipt,
    Split,
    Merge,
}

/// Immutable link from a layer back to where its cost came from.
///
/// `source_item_id` is the receipt line the cost originally entered the ledger
/// through; it is carried forward unchanged across any number of splits and
/// merges. `parent_layer` is the layer this one was cut from (`None` when it
/// was funded directly by a receipt line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub kind: ProvenanceKind,
    pub reference: ReferenceId,
    pub source_item_id: SourceItemId,
    pub parent_layer: Option<LayerId>,
}

impl Provenance {
    pub fn from_lot(kind: ProvenanceKind, reference: ReferenceId, lot: &ConsumedLot) -> Self {
        Self {
            kind,
            reference,
            source_item_id: lot.source_item_id,
            parent_layer: lot.layer_id,
        }
    }
}

/// The atomic unit of cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FifoLayer {
    pub id: LayerId,
    pub packet_id: PacketId,
    pub warehouse_id: WarehouseId,
    /// Quantity at creation.
    pub qty: Carats,
    /// `0 <= remaining_qty <= qty`; only ever decreases.
    pub remaining_qty: Carats,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

impl FifoLayer {
    pub fn is_exhausted(&self) -> bool {
        self.remaining_qty.is_zero()
    }

    /// Value of what is left on this layer, at full precision.
    pub fn remaining_value(&self) -> DomainResult<Decimal> {
        self.remaining_qty.times(self.unit_price)
    }
}

/// A slice taken from one layer (or from a receipt line's virtual lot) by a
/// consume. This is the cost basis handed to whatever is produced next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedLot {
    /// `None` when the lot was drawn from a receipt line rather than a layer.
    pub layer_id: Option<LayerId>,
    pub quantity: Carats,
    pub unit_price: Money,
    pub source_item_id: SourceItemId,
}

impl ConsumedLot {
    pub fn value(&self) -> DomainResult<Decimal> {
        self.quantity.times(self.unit_price)
    }
}
