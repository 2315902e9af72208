//! Staged read-modify-write over ledger records.
//!
//! A [`UnitOfWork`] loads records from the committed store into private
//! copies, lets an operation mutate them, and turns the result into one
//! [`ChangeSet`]. Nothing is visible to readers until [`UnitOfWork::commit`];
//! dropping the unit discards every staged change.
//!
//! Every record a unit touches must be covered by the caller's [`KeyLocks`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use gemledger_core::{
    Carats, DomainError, DomainResult, PacketId, ReferenceId, SourceItemId, WarehouseId,
};
use gemledger_events::EventEnvelope;
use gemledger_inventory::{
    ConsumedLot, CostSource, LayerId, LayerStack, MovementType, NewPacketSpec, Packet,
    ProvenanceKind, SourceDocumentItem, StockMovement,
};

use crate::ledger_store::{ChangeSet, LedgerKey, LedgerStore};
use crate::locks::{KeyLockTable, KeyLocks};

/// Result of a committed operation plus the movements it recorded, ready for
/// publication.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub result: T,
    pub movements: Vec<EventEnvelope<StockMovement>>,
}

/// Store plus lock table, shared by every component that mutates the ledger.
#[derive(Debug, Clone)]
pub struct LedgerAccess<S> {
    store: S,
    locks: Arc<KeyLockTable>,
    lock_timeout: Duration,
}

impl<S: LedgerStore> LedgerAccess<S> {
    pub fn new(store: S, locks: Arc<KeyLockTable>, lock_timeout: Duration) -> Self {
        Self {
            store,
            locks,
            lock_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Acquire `keys`, run `work` against a fresh unit, and commit it while
    /// the keys are still held. Any error discards the unit.
    pub fn execute<T>(
        &self,
        keys: impl IntoIterator<Item = LedgerKey>,
        work: impl FnOnce(&mut UnitOfWork<'_, S>) -> DomainResult<T>,
    ) -> DomainResult<Committed<T>> {
        let locks = self.locks.acquire(keys, self.lock_timeout)?;
        let mut uow = UnitOfWork::begin(&self.store, &locks);
        let result = work(&mut uow)?;
        let movements = uow.commit()?;
        Ok(Committed { result, movements })
    }
}

pub struct UnitOfWork<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    locks: &'a KeyLocks<'a>,
    packets: BTreeMap<PacketId, Packet>,
    created: BTreeSet<PacketId>,
    stacks: BTreeMap<(PacketId, WarehouseId), LayerStack>,
    items: BTreeMap<SourceItemId, SourceDocumentItem>,
    movements: Vec<StockMovement>,
}

impl<'a, S: LedgerStore + ?Sized> UnitOfWork<'a, S> {
    pub fn begin(store: &'a S, locks: &'a KeyLocks<'a>) -> Self {
        Self {
            store,
            locks,
            packets: BTreeMap::new(),
            created: BTreeSet::new(),
            stacks: BTreeMap::new(),
            items: BTreeMap::new(),
            movements: Vec::new(),
        }
    }

    fn ensure_locked(&self, key: LedgerKey) -> DomainResult<()> {
        if !self.locks.covers(&key) {
            return Err(DomainError::storage(format!(
                "{key} touched without holding its lock"
            )));
        }
        Ok(())
    }

    fn load_packet(&mut self, id: PacketId) -> DomainResult<&mut Packet> {
        if !self.packets.contains_key(&id) {
            let packet = self
                .store
                .packet(id)?
                .ok_or_else(|| DomainError::not_found(format!("packet {id}")))?;
            self.ensure_locked(LedgerKey::packet(id, packet.warehouse_id))?;
            self.packets.insert(id, packet);
        }
        self.packets
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("packet {id}")))
    }

    /// Staged view of a packet.
    pub fn packet(&mut self, id: PacketId) -> DomainResult<&Packet> {
        self.load_packet(id).map(|p| &*p)
    }

    /// Mutable staged view of a packet (status changes).
    pub fn packet_mut(&mut self, id: PacketId) -> DomainResult<&mut Packet> {
        self.load_packet(id)
    }

    /// Stage a brand-new, empty packet. The code is checked against both the
    /// committed store and packets created earlier in this unit.
    pub fn create_packet(
        &mut self,
        id: PacketId,
        spec: &NewPacketSpec,
        warehouse_id: WarehouseId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<&Packet> {
        self.ensure_locked(LedgerKey::packet(id, warehouse_id))?;
        let packet = Packet::create(id, spec, warehouse_id, created_at)?;
        if self.store.packet_by_code(&packet.code)?.is_some()
            || self.packets.values().any(|p| p.code == packet.code)
        {
            return Err(DomainError::validation(format!(
                "packet code {} is already in use",
                packet.code
            )));
        }
        if self.packets.contains_key(&id) || self.store.packet(id)?.is_some() {
            return Err(DomainError::validation(format!("packet {id} already exists")));
        }

        self.created.insert(id);
        self.stacks
            .insert((id, warehouse_id), LayerStack::new(id, warehouse_id));
        self.packets.insert(id, packet);
        self.packet(id)
    }

    /// Staged layer stack of a packet in a warehouse.
    pub fn stack(
        &mut self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<&mut LayerStack> {
        let key = (packet_id, warehouse_id);
        if !self.stacks.contains_key(&key) {
            self.ensure_locked(LedgerKey::packet(packet_id, warehouse_id))?;
            let snapshot = self
                .store
                .packet_snapshot(packet_id, warehouse_id)?
                .ok_or_else(|| DomainError::not_found(format!("packet {packet_id}")))?;
            let stack = LayerStack::from_layers(packet_id, warehouse_id, snapshot.layers)?;
            self.packets.entry(packet_id).or_insert(snapshot.packet);
            self.stacks.insert(key, stack);
        }
        self.stacks
            .get_mut(&key)
            .ok_or_else(|| DomainError::not_found(format!("packet {packet_id}")))
    }

    pub fn available(
        &mut self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<Carats> {
        Ok(self.stack(packet_id, warehouse_id)?.available())
    }

    /// Staged view of a receipt line.
    pub fn source_item(&mut self, id: SourceItemId) -> DomainResult<&mut SourceDocumentItem> {
        if !self.items.contains_key(&id) {
            let item = self
                .store
                .source_item(id)?
                .ok_or_else(|| DomainError::not_found(format!("source document item {id}")))?;
            self.ensure_locked(LedgerKey::source_item(id, item.warehouse_id))?;
            self.items.insert(id, item);
        }
        self.items
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("source document item {id}")))
    }

    /// Take `quantity` out of a packet, oldest layers first.
    ///
    /// Retires the packet (and records a `depleted` movement) when nothing is
    /// left on it.
    pub fn consume_packet(
        &mut self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
        quantity: Carats,
        reference: ReferenceId,
        at: DateTime<Utc>,
    ) -> DomainResult<Vec<ConsumedLot>> {
        {
            let packet = self.load_packet(packet_id)?;
            packet.ensure_in(warehouse_id)?;
            packet.ensure_movable()?;
        }

        let stack = self.stack(packet_id, warehouse_id)?;
        let lots = stack.consume(quantity)?;
        let left = stack.available();
        debug!(
            packet_id = %packet_id,
            quantity = %quantity,
            layers = ?lots.iter().filter_map(|l| l.layer_id).collect::<Vec<_>>(),
            left = %left,
            "fifo layers consumed"
        );

        if self.load_packet(packet_id)?.sync_with_stock(left) {
            self.record(StockMovement::for_packet(
                packet_id,
                warehouse_id,
                MovementType::Depleted,
                Carats::ZERO,
                reference,
                at,
                json!({}),
            ));
        }
        Ok(lots)
    }

    /// Draw `quantity` from a receipt line's unallocated remainder.
    pub fn draw_source_item(
        &mut self,
        item_id: SourceItemId,
        quantity: Carats,
    ) -> DomainResult<Vec<ConsumedLot>> {
        self.source_item(item_id)?.consume(quantity)
    }

    /// Append one layer per lot onto a packet, carrying each lot's cost basis.
    /// A depleted packet that receives stock becomes available again.
    pub fn produce(
        &mut self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
        lots: &[ConsumedLot],
        kind: ProvenanceKind,
        reference: ReferenceId,
        at: DateTime<Utc>,
    ) -> DomainResult<Vec<LayerId>> {
        {
            let packet = self.load_packet(packet_id)?;
            packet.ensure_in(warehouse_id)?;
            packet.ensure_movable()?;
        }

        let store = self.store;
        let stack = self.stack(packet_id, warehouse_id)?;
        let produced = stack.produce_lots(lots, kind, reference, at, || store.next_layer_id())?;
        let holding = stack.available();
        debug!(
            packet_id = %packet_id,
            layers = ?produced,
            holding = %holding,
            "fifo layers produced"
        );

        self.load_packet(packet_id)?.sync_with_stock(holding);
        Ok(produced)
    }

    pub fn record(&mut self, movement: StockMovement) {
        self.movements.push(movement);
    }

    /// Turn everything staged into one change set and apply it atomically.
    pub fn commit(self) -> DomainResult<Vec<EventEnvelope<StockMovement>>> {
        let mut changes = ChangeSet::default();
        for (id, packet) in self.packets {
            if self.created.contains(&id) {
                changes.new_packets.push(packet);
            } else {
                changes.packets.push(packet);
            }
        }
        changes.layer_stacks = self.stacks.into_values().collect();
        changes.source_items = self.items.into_values().collect();
        changes.movements = self.movements;

        Ok(self.store.commit(changes)?)
    }
}
