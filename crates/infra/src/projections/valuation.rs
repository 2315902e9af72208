//! Valuation reports over committed layer state.
//!
//! Everything here is derived at call time from one store snapshot; nothing
//! is cached. Per-row values are rounded to currency precision once, and
//! totals are rounded once from the full-precision sum (not summed from
//! rounded rows), so repeated reads of unchanged state are identical.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gemledger_core::{
    Carats, DomainError, DomainResult, Money, PacketId, SourceItemId, WarehouseId, sum_values,
};
use gemledger_inventory::{CostSource, FifoLayer, LayerStack, Packet, PacketStatus};

use crate::ledger_store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketValuation {
    pub packet_id: PacketId,
    pub code: String,
    pub warehouse_id: WarehouseId,
    pub status: PacketStatus,
    pub available_carats: Carats,
    pub total_value: Money,
    /// `None` when the packet holds nothing.
    pub avg_rate: Option<Money>,
    pub open_layers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseValuation {
    pub warehouse_id: WarehouseId,
    pub warehouse_name: String,
    /// Packets holding stock, ordered by code.
    pub rows: Vec<PacketValuation>,
    pub total_carats: Carats,
    pub total_value: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub warehouse_id: WarehouseId,
    pub packets_checked: usize,
    pub layers_checked: usize,
    pub items_checked: usize,
    /// Σ allocated_qty × unit_price over the warehouse's receipt lines.
    pub funded_value: Decimal,
    /// Σ remaining_qty × unit_price over the warehouse's layers.
    pub held_value: Decimal,
    pub violations: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

fn valuation_of(packet: &Packet, stack: &LayerStack) -> DomainResult<PacketValuation> {
    Ok(PacketValuation {
        packet_id: packet.id,
        code: packet.code.clone(),
        warehouse_id: stack.warehouse_id(),
        status: packet.status,
        available_carats: stack.available(),
        total_value: stack.total_value()?,
        avg_rate: stack.avg_rate()?,
        open_layers: stack.layers().iter().filter(|l| !l.is_exhausted()).count(),
    })
}

fn add_value(total: Decimal, value: Decimal) -> DomainResult<Decimal> {
    total
        .checked_add(value)
        .ok_or_else(|| DomainError::storage("warehouse value is out of range"))
}

/// Read-only: never takes ledger keys and never writes.
#[derive(Debug, Clone)]
pub struct ValuationReporter<S> {
    store: S,
}

impl<S: LedgerStore> ValuationReporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> DomainResult<()> {
        if self.store.warehouse(warehouse_id)?.is_none() {
            return Err(DomainError::not_found(format!("warehouse {warehouse_id}")));
        }
        Ok(())
    }

    fn stack(
        &self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<(Packet, LayerStack)> {
        self.ensure_warehouse(warehouse_id)?;
        let snapshot = self
            .store
            .packet_snapshot(packet_id, warehouse_id)?
            .ok_or_else(|| DomainError::not_found(format!("packet {packet_id}")))?;
        let stack = LayerStack::from_layers(packet_id, warehouse_id, snapshot.layers)?;
        Ok((snapshot.packet, stack))
    }

    pub fn packet_valuation(
        &self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<PacketValuation> {
        let (packet, stack) = self.stack(packet_id, warehouse_id)?;
        valuation_of(&packet, &stack)
    }

    /// Every layer of the packet in the warehouse, exhausted ones included,
    /// in consumption order.
    pub fn fifo_layers(
        &self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<Vec<FifoLayer>> {
        let (_, stack) = self.stack(packet_id, warehouse_id)?;
        Ok(stack.into_layers())
    }

    pub fn warehouse_valuation(
        &self,
        warehouse_id: WarehouseId,
    ) -> DomainResult<WarehouseValuation> {
        let snapshot = self
            .store
            .warehouse_snapshot(warehouse_id)?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id}")))?;

        let mut rows = Vec::new();
        let mut exact_total = Decimal::ZERO;
        let mut total_carats = Carats::ZERO;
        for packet in &snapshot.packets {
            let layers: Vec<FifoLayer> = snapshot
                .layers
                .iter()
                .filter(|l| l.packet_id == packet.id)
                .cloned()
                .collect();
            let stack = LayerStack::from_layers(packet.id, warehouse_id, layers)?;
            if stack.available().is_zero() {
                continue;
            }
            exact_total = add_value(exact_total, stack.exact_value()?)?;
            total_carats += stack.available();
            rows.push(valuation_of(packet, &stack)?);
        }
        rows.sort_by(|a, b| a.code.cmp(&b.code));

        Ok(WarehouseValuation {
            warehouse_id,
            warehouse_name: snapshot.warehouse.name,
            rows,
            total_carats,
            total_value: Money::new(exact_total),
        })
    }

    /// Recheck every stored invariant of one warehouse and compare what its
    /// receipts funded against what its layers hold.
    pub fn audit_warehouse(&self, warehouse_id: WarehouseId) -> DomainResult<AuditReport> {
        let snapshot = self
            .store
            .warehouse_snapshot(warehouse_id)?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id}")))?;
        let mut violations = Vec::new();

        let mut held_value = Decimal::ZERO;
        for layer in &snapshot.layers {
            if layer.remaining_qty.is_negative() || layer.remaining_qty > layer.qty {
                violations.push(format!(
                    "layer {}: remaining {} outside 0..={}",
                    layer.id, layer.remaining_qty, layer.qty
                ));
            }
            if !snapshot.packets.iter().any(|p| p.id == layer.packet_id) {
                violations.push(format!(
                    "layer {}: packet {} is not homed here",
                    layer.id, layer.packet_id
                ));
            }
            held_value = add_value(held_value, layer.remaining_value()?)?;
        }

        let mut funded_value = Decimal::ZERO;
        for item in &snapshot.source_items {
            if item.allocated_qty.is_negative() || item.allocated_qty > item.received_qty {
                violations.push(format!(
                    "source item {}: allocated {} outside 0..={}",
                    item.id, item.allocated_qty, item.received_qty
                ));
            }
            funded_value = add_value(funded_value, item.allocated_qty.times(item.unit_price)?)?;
        }

        for packet in &snapshot.packets {
            let available: Carats = snapshot
                .layers
                .iter()
                .filter(|l| l.packet_id == packet.id)
                .map(|l| l.remaining_qty)
                .sum();
            match packet.status {
                PacketStatus::Depleted if available.is_positive() => violations.push(format!(
                    "packet {}: depleted but holds {available}",
                    packet.code
                )),
                PacketStatus::Available if available.is_zero() => violations.push(format!(
                    "packet {}: available but holds nothing",
                    packet.code
                )),
                _ => {}
            }
        }

        // Layers funded by a receipt line in another warehouse would make the
        // two sums incomparable.
        let foreign_funding = snapshot.layers.iter().any(|l| {
            !snapshot
                .source_items
                .iter()
                .any(|i| i.id == l.provenance.source_item_id)
        });
        if !foreign_funding && funded_value != held_value {
            violations.push(format!(
                "conservation: receipts funded {funded_value}, layers hold {held_value}"
            ));
        }

        Ok(AuditReport {
            warehouse_id,
            packets_checked: snapshot.packets.len(),
            layers_checked: snapshot.layers.len(),
            items_checked: snapshot.source_items.len(),
            funded_value,
            held_value,
            violations,
        })
    }

    /// Cost still held in layers that trace back to one receipt line.
    pub fn value_from_source_item(
        &self,
        warehouse_id: WarehouseId,
        source_item_id: SourceItemId,
    ) -> DomainResult<Money> {
        let snapshot = self
            .store
            .warehouse_snapshot(warehouse_id)?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id}")))?;
        let exact = sum_values(
            snapshot
                .layers
                .iter()
                .filter(|l| l.provenance.source_item_id == source_item_id)
                .map(FifoLayer::remaining_value),
        )?;
        Ok(Money::new(exact))
    }
}
