use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gemledger_core::{
    Carats, DomainError, DomainResult, Money, SourceDocumentId, SourceItemId, WarehouseId,
};

use crate::fifo::{CostSource, ensure_positive};
use crate::layer::ConsumedLot;

/// An external document (goods receipt) whose lines fund new stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: SourceDocumentId,
    pub warehouse_id: WarehouseId,
    /// Caller-facing document number (e.g. "GRN-2024-0012").
    pub reference: String,
    pub item_ids: Vec<SourceItemId>,
    pub posted_at: DateTime<Utc>,
}

/// One receipt line.
///
/// `allocated_qty` only ever grows, through [`CostSource::consume`], and never
/// past `received_qty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocumentItem {
    pub id: SourceItemId,
    pub document_id: SourceDocumentId,
    pub warehouse_id: WarehouseId,
    pub description: Option<String>,
    pub received_qty: Carats,
    pub allocated_qty: Carats,
    pub unit_price: Money,
    pub received_at: DateTime<Utc>,
}

impl SourceDocumentItem {
    pub fn new(
        id: SourceItemId,
        document_id: SourceDocumentId,
        warehouse_id: WarehouseId,
        received_qty: Carats,
        unit_price: Money,
        description: Option<String>,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive(received_qty, "received quantity")?;
        if unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        received_qty.times(unit_price)?;
        Ok(Self {
            id,
            document_id,
            warehouse_id,
            description,
            received_qty,
            allocated_qty: Carats::ZERO,
            unit_price,
            received_at,
        })
    }

    pub fn remaining_qty(&self) -> Carats {
        self.received_qty - self.allocated_qty
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.remaining_qty().is_zero()
    }
}

/// A receipt line is a single virtual layer at its received unit price.
impl CostSource for SourceDocumentItem {
    fn available(&self) -> Carats {
        self.remaining_qty()
    }

    fn consume(&mut self, requested: Carats) -> DomainResult<Vec<ConsumedLot>> {
        ensure_positive(requested, "allocated quantity")?;

        let available = self.remaining_qty();
        if available < requested {
            return Err(DomainError::insufficient(available, requested));
        }

        self.allocated_qty += requested;
        Ok(vec![ConsumedLot {
            layer_id: None,
            quantity: requested,
            unit_price: self.unit_price,
            source_item_id: self.id,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn grn_line(qty: rust_decimal::Decimal, price: rust_decimal::Decimal) -> SourceDocumentItem {
        SourceDocumentItem::new(
            SourceItemId::new(),
            SourceDocumentId::new(),
            WarehouseId::new(),
            Carats::new(qty),
            Money::new(price),
            Some("rough 1-2ct".to_string()),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn allocation_draws_at_received_unit_price() {
        let mut item = grn_line(dec!(10), dec!(5000));

        let lots = item.consume(Carats::new(dec!(4))).unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].unit_price, Money::new(dec!(5000)));
        assert_eq!(lots[0].layer_id, None);
        assert_eq!(lots[0].source_item_id, item.id);
        assert_eq!(item.allocated_qty, Carats::new(dec!(4)));
        assert_eq!(item.remaining_qty(), Carats::new(dec!(6)));
    }

    #[test]
    fn over_allocation_is_rejected_without_change() {
        let mut item = grn_line(dec!(1.5), dec!(100));
        item.consume(Carats::new(dec!(1))).unwrap();

        let err = item.consume(Carats::new(dec!(0.501))).unwrap_err();
        assert_eq!(
            err,
            DomainError::insufficient(Carats::new(dec!(0.5)), Carats::new(dec!(0.501)))
        );
        assert_eq!(item.allocated_qty, Carats::new(dec!(1)));
    }

    #[test]
    fn rejects_non_positive_receipts() {
        let err = SourceDocumentItem::new(
            SourceItemId::new(),
            SourceDocumentId::new(),
            WarehouseId::new(),
            Carats::ZERO,
            Money::new(dec!(1)),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_lines_whose_value_overflows() {
        let err = SourceDocumentItem::new(
            SourceItemId::new(),
            SourceDocumentId::new(),
            WarehouseId::new(),
            Carats::new(dec!(100000000000000)),
            Money::new(dec!(1000000000000000)),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn full_allocation_is_detected() {
        let mut item = grn_line(dec!(2), dec!(10));
        item.consume(Carats::new(dec!(2))).unwrap();
        assert!(item.is_fully_allocated());
    }
}
