//! FIFO costing.
//!
//! A [`LayerStack`] holds every cost layer of one packet in one warehouse, kept
//! in consumption order: `created_at` ascending, ties broken by layer id.
//!
//! - `consume` walks the stack oldest-first and is all-or-nothing: it checks
//!   the total before touching any layer.
//! - `produce` always appends a new layer, so unit prices and provenance of
//!   different lots never blend.
//!
//! Because produced layers copy the quantity and unit price of the lots they
//! were funded from, `Σ(quantity × unit_price)` is conserved exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gemledger_core::{
    Carats, DomainError, DomainResult, Money, PacketId, ReferenceId, WarehouseId, sum_values,
};

use crate::layer::{ConsumedLot, FifoLayer, LayerId, Provenance, ProvenanceKind};

/// Anything stock can be drawn from at a known cost basis.
///
/// Implemented by packet layer stacks and by receipt lines (which behave as a
/// single virtual layer at their received unit price).
pub trait CostSource {
    /// Quantity that can currently be consumed.
    fn available(&self) -> Carats;

    /// Take exactly `requested` out of this source.
    ///
    /// Fails with `InsufficientStock` (and leaves the source untouched) when
    /// `requested > available()`.
    fn consume(&mut self, requested: Carats) -> DomainResult<Vec<ConsumedLot>>;
}

/// Total value of a set of consumed lots, at full precision.
pub fn lots_value(lots: &[ConsumedLot]) -> DomainResult<Decimal> {
    sum_values(lots.iter().map(ConsumedLot::value))
}

pub(crate) fn ensure_positive(quantity: Carats, what: &str) -> DomainResult<()> {
    if !quantity.is_positive() {
        return Err(DomainError::validation(format!(
            "{what} must be positive (got {quantity})"
        )));
    }
    Ok(())
}

/// Cost layers of one (packet, warehouse) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStack {
    packet_id: PacketId,
    warehouse_id: WarehouseId,
    layers: Vec<FifoLayer>,
}

impl LayerStack {
    pub fn new(packet_id: PacketId, warehouse_id: WarehouseId) -> Self {
        Self {
            packet_id,
            warehouse_id,
            layers: Vec::new(),
        }
    }

    /// Rebuild a stack from stored layers, checking ownership and bounds.
    pub fn from_layers(
        packet_id: PacketId,
        warehouse_id: WarehouseId,
        mut layers: Vec<FifoLayer>,
    ) -> DomainResult<Self> {
        for layer in &layers {
            if layer.packet_id != packet_id || layer.warehouse_id != warehouse_id {
                return Err(DomainError::storage(format!(
                    "layer {} does not belong to packet {packet_id} in warehouse {warehouse_id}",
                    layer.id
                )));
            }
            if layer.remaining_qty.is_negative() || layer.remaining_qty > layer.qty {
                return Err(DomainError::storage(format!(
                    "layer {} violates 0 <= remaining ({}) <= qty ({})",
                    layer.id, layer.remaining_qty, layer.qty
                )));
            }
        }
        layers.sort_by_key(|l| (l.created_at, l.id));
        Ok(Self {
            packet_id,
            warehouse_id,
            layers,
        })
    }

    pub fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    /// All layers, exhausted ones included, in consumption order.
    pub fn layers(&self) -> &[FifoLayer] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<FifoLayer> {
        self.layers
    }

    /// Σ remaining value at full precision.
    pub fn exact_value(&self) -> DomainResult<Decimal> {
        sum_values(self.layers.iter().map(FifoLayer::remaining_value))
    }

    /// Σ remaining value, rounded once to currency precision.
    pub fn total_value(&self) -> DomainResult<Money> {
        Ok(Money::new(self.exact_value()?))
    }

    /// Weighted average unit price of what remains; `None` when empty.
    pub fn avg_rate(&self) -> DomainResult<Option<Money>> {
        let available = self.available();
        if available.is_zero() {
            return Ok(None);
        }
        let rate = self
            .exact_value()?
            .checked_div(available.value())
            .ok_or_else(|| DomainError::validation("average rate is out of range"))?;
        Ok(Some(Money::new(rate)))
    }

    /// Append a new layer. Never merges into an existing one.
    ///
    /// `created_at` is clamped to the newest layer already on the stack, so a
    /// backdated request can never queue new stock ahead of older stock.
    pub fn produce(
        &mut self,
        id: LayerId,
        quantity: Carats,
        unit_price: Money,
        provenance: Provenance,
        created_at: DateTime<Utc>,
    ) -> DomainResult<LayerId> {
        ensure_positive(quantity, "produced quantity")?;
        if unit_price.is_negative() {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        if self.layers.iter().any(|l| l.id == id) {
            return Err(DomainError::storage(format!("duplicate layer id {id}")));
        }
        let value = quantity.times(unit_price)?;
        let held = self.exact_value()?;
        if held.checked_add(value).is_none() {
            return Err(DomainError::validation(format!(
                "packet {} cannot hold another {value} of value",
                self.packet_id
            )));
        }
        let created_at = self
            .layers
            .last()
            .map_or(created_at, |newest| newest.created_at.max(created_at));

        self.layers.push(FifoLayer {
            id,
            packet_id: self.packet_id,
            warehouse_id: self.warehouse_id,
            qty: quantity,
            remaining_qty: quantity,
            unit_price,
            created_at,
            provenance,
        });
        self.layers.sort_by_key(|l| (l.created_at, l.id));
        Ok(id)
    }

    /// Produce one layer per consumed lot, carrying its quantity and unit
    /// price forward unchanged. `next_id` is called once per lot, in order.
    pub fn produce_lots(
        &mut self,
        lots: &[ConsumedLot],
        kind: ProvenanceKind,
        reference: ReferenceId,
        created_at: DateTime<Utc>,
        mut next_id: impl FnMut() -> LayerId,
    ) -> DomainResult<Vec<LayerId>> {
        let mut produced = Vec::with_capacity(lots.len());
        for lot in lots {
            let provenance = Provenance::from_lot(kind, reference, lot);
            produced.push(self.produce(
                next_id(),
                lot.quantity,
                lot.unit_price,
                provenance,
                created_at,
            )?);
        }
        Ok(produced)
    }
}

impl CostSource for LayerStack {
    fn available(&self) -> Carats {
        self.layers.iter().map(|l| l.remaining_qty).sum()
    }

    fn consume(&mut self, requested: Carats) -> DomainResult<Vec<ConsumedLot>> {
        ensure_positive(requested, "consumed quantity")?;

        let available = self.available();
        if available < requested {
            return Err(DomainError::insufficient(available, requested));
        }

        let mut outstanding = requested;
        let mut lots = Vec::new();
        for layer in self.layers.iter_mut() {
            if outstanding.is_zero() {
                break;
            }
            if layer.is_exhausted() {
                continue;
            }
            let take = layer.remaining_qty.min(outstanding);
            layer.remaining_qty -= take;
            outstanding -= take;
            lots.push(ConsumedLot {
                layer_id: Some(layer.id),
                quantity: take,
                unit_price: layer.unit_price,
                source_item_id: layer.provenance.source_item_id,
            });
        }

        Ok(lots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gemledger_core::SourceItemId;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn receipt(reference: ReferenceId) -> Provenance {
        Provenance {
            kind: ProvenanceKind::Receipt,
            reference,
            source_item_id: SourceItemId::new(),
            parent_layer: None,
        }
    }

    fn ct(v: Decimal) -> Carats {
        Carats::new(v)
    }

    fn px(v: Decimal) -> Money {
        Money::new(v)
    }

    /// Three layers at t1 < t2 < t3 priced 100, 200, 300.
    fn three_layer_stack() -> LayerStack {
        let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
        let t0 = Utc::now();
        for (i, price) in [dec!(100), dec!(200), dec!(300)].into_iter().enumerate() {
            stack
                .produce(
                    LayerId(i as u64 + 1),
                    ct(dec!(2)),
                    px(price),
                    receipt(ReferenceId::new()),
                    t0 + Duration::seconds(i as i64),
                )
                .unwrap();
        }
        stack
    }

    #[test]
    fn consume_satisfiable_by_oldest_layer_touches_only_it() {
        let mut stack = three_layer_stack();
        let lots = stack.consume(ct(dec!(1.5))).unwrap();

        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].layer_id, Some(LayerId(1)));
        assert_eq!(lots[0].unit_price, px(dec!(100)));

        let remaining: Vec<_> = stack.layers().iter().map(|l| l.remaining_qty).collect();
        assert_eq!(remaining, vec![ct(dec!(0.5)), ct(dec!(2)), ct(dec!(2))]);
    }

    #[test]
    fn consume_spans_layers_oldest_first_and_skips_exhausted() {
        let mut stack = three_layer_stack();
        stack.consume(ct(dec!(2))).unwrap();

        let lots = stack.consume(ct(dec!(3))).unwrap();
        let taken: Vec<_> = lots.iter().map(|l| (l.layer_id, l.quantity)).collect();
        assert_eq!(
            taken,
            vec![
                (Some(LayerId(2)), ct(dec!(2))),
                (Some(LayerId(3)), ct(dec!(1)))
            ]
        );
        assert_eq!(lots_value(&lots).unwrap(), dec!(700));
        assert_eq!(stack.available(), ct(dec!(1)));
    }

    #[test]
    fn insufficient_stock_leaves_stack_untouched() {
        let mut stack = three_layer_stack();
        let before = stack.clone();

        let err = stack.consume(ct(dec!(6.001))).unwrap_err();
        assert_eq!(err, DomainError::insufficient(ct(dec!(6)), ct(dec!(6.001))));
        assert_eq!(stack, before);
    }

    #[test]
    fn non_positive_consume_is_a_validation_error() {
        let mut stack = three_layer_stack();
        assert!(matches!(stack.consume(Carats::ZERO), Err(DomainError::Validation(_))));
        assert!(matches!(stack.consume(ct(dec!(-1))), Err(DomainError::Validation(_))));
    }

    #[test]
    fn ties_on_created_at_are_broken_by_layer_id() {
        let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
        let at = Utc::now();
        stack
            .produce(LayerId(9), ct(dec!(1)), px(dec!(900)), receipt(ReferenceId::new()), at)
            .unwrap();
        stack
            .produce(LayerId(4), ct(dec!(1)), px(dec!(400)), receipt(ReferenceId::new()), at)
            .unwrap();

        let lots = stack.consume(ct(dec!(1))).unwrap();
        assert_eq!(lots[0].layer_id, Some(LayerId(4)));
    }

    #[test]
    fn backdated_layers_queue_behind_existing_stock() {
        let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
        let now = Utc::now();
        stack
            .produce(LayerId(7), ct(dec!(1)), px(dec!(700)), receipt(ReferenceId::new()), now)
            .unwrap();
        stack
            .produce(
                LayerId(8),
                ct(dec!(1)),
                px(dec!(800)),
                receipt(ReferenceId::new()),
                now - Duration::days(3),
            )
            .unwrap();

        assert_eq!(stack.layers()[1].id, LayerId(8));
        assert_eq!(stack.layers()[1].created_at, now);
        let lots = stack.consume(ct(dec!(1))).unwrap();
        assert_eq!(lots[0].layer_id, Some(LayerId(7)));
    }

    #[test]
    fn produce_rejects_value_the_stack_cannot_represent() {
        let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
        let at = Utc::now();
        let err = stack
            .produce(
                LayerId(1),
                ct(dec!(100000000000000)),
                px(dec!(1000000000000000)),
                receipt(ReferenceId::new()),
                at,
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(stack.layers().is_empty());

        // Each layer fits on its own; together they exceed Decimal::MAX.
        let half = ct(dec!(40000000000000000000000));
        let price = px(dec!(1000000));
        stack.produce(LayerId(2), half, price, receipt(ReferenceId::new()), at).unwrap();
        assert!(stack
            .produce(LayerId(3), half, price, receipt(ReferenceId::new()), at)
            .is_err());
        assert_eq!(stack.layers().len(), 1);
    }

    #[test]
    fn produce_never_merges_layers() {
        let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
        let at = Utc::now();
        let provenance = receipt(ReferenceId::new());
        stack.produce(LayerId(1), ct(dec!(1)), px(dec!(50)), provenance.clone(), at).unwrap();
        stack.produce(LayerId(2), ct(dec!(1)), px(dec!(50)), provenance, at).unwrap();
        assert_eq!(stack.layers().len(), 2);
    }

    #[test]
    fn derived_valuation_uses_remaining_quantities() {
        let mut stack = three_layer_stack();
        assert_eq!(stack.total_value().unwrap(), px(dec!(1200)));
        assert_eq!(stack.avg_rate().unwrap(), Some(px(dec!(200))));

        stack.consume(ct(dec!(2))).unwrap();
        assert_eq!(stack.total_value().unwrap(), px(dec!(1000)));
        assert_eq!(stack.avg_rate().unwrap(), Some(px(dec!(250))));

        stack.consume(ct(dec!(4))).unwrap();
        assert_eq!(stack.avg_rate().unwrap(), None);
        assert_eq!(stack.total_value().unwrap(), Money::ZERO);
    }

    #[test]
    fn produced_lots_carry_cost_basis_and_lineage() {
        let mut source = three_layer_stack();
        let lots = source.consume(ct(dec!(3))).unwrap();

        let mut target = LayerStack::new(PacketId::new(), source.warehouse_id());
        let reference = ReferenceId::new();
        let mut next = 100;
        let ids = target
            .produce_lots(&lots, ProvenanceKind::Split, reference, Utc::now(), || {
                next += 1;
                LayerId(next)
            })
            .unwrap();

        assert_eq!(ids, vec![LayerId(101), LayerId(102)]);
        assert_eq!(target.exact_value().unwrap(), lots_value(&lots).unwrap());
        assert_eq!(target.layers()[0].provenance.parent_layer, Some(LayerId(1)));
        assert_eq!(target.layers()[1].provenance.parent_layer, Some(LayerId(2)));
        assert_eq!(target.layers()[1].unit_price, px(dec!(200)));
    }

    #[test]
    fn from_layers_rejects_foreign_or_out_of_bounds_layers() {
        let stack = three_layer_stack();
        let mut layers = stack.layers().to_vec();
        layers[0].remaining_qty = ct(dec!(5));
        assert!(LayerStack::from_layers(stack.packet_id(), stack.warehouse_id(), layers).is_err());

        let layers = stack.layers().to_vec();
        assert!(LayerStack::from_layers(PacketId::new(), stack.warehouse_id(), layers).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: moving stock lot-by-lot between stacks conserves total
        /// value exactly and never drives a layer negative.
        #[test]
        fn transfers_conserve_value_and_stay_non_negative(
            receipts in prop::collection::vec((1u32..50_000u32, 1u32..1_000_000u32), 1..8),
            draws in prop::collection::vec(1u32..60_000u32, 1..12),
        ) {
            let warehouse = WarehouseId::new();
            let mut source = LayerStack::new(PacketId::new(), warehouse);
            let mut target = LayerStack::new(PacketId::new(), warehouse);
            let at = Utc::now();
            let mut next_id = 0u64;

            for (milli_ct, cents) in receipts {
                next_id += 1;
                source.produce(
                    LayerId(next_id),
                    Carats::new(Decimal::new(milli_ct as i64, 3)),
                    Money::new(Decimal::new(cents as i64, 2)),
                    receipt(ReferenceId::new()),
                    at,
                ).unwrap();
            }
            let initial = source.exact_value().unwrap();

            for milli_ct in draws {
                let requested = Carats::new(Decimal::new(milli_ct as i64, 3));
                let before = source.clone();
                match source.consume(requested) {
                    Ok(lots) => {
                        let taken: Carats = lots.iter().map(|l| l.quantity).sum();
                        prop_assert_eq!(taken, requested);
                        target
                            .produce_lots(&lots, ProvenanceKind::Merge, ReferenceId::new(), at, || {
                                next_id += 1;
                                LayerId(next_id)
                            })
                            .unwrap();
                    }
                    Err(DomainError::InsufficientStock { available, requested: r }) => {
                        prop_assert_eq!(available, before.available());
                        prop_assert_eq!(r, requested);
                        prop_assert_eq!(&source, &before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }

                prop_assert_eq!(
                    source.exact_value().unwrap() + target.exact_value().unwrap(),
                    initial
                );
                for layer in source.layers().iter().chain(target.layers()) {
                    prop_assert!(!layer.remaining_qty.is_negative());
                    prop_assert!(layer.remaining_qty <= layer.qty);
                }
            }
        }
    }
}
