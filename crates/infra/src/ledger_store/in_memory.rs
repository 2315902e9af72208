use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use gemledger_core::{Entity, PacketId, ReferenceId, SourceDocumentId, SourceItemId, WarehouseId};
use gemledger_events::EventEnvelope;
use gemledger_inventory::{
    FifoLayer, LayerId, Packet, SourceDocument, SourceDocumentItem, StockMovement, Warehouse,
};

use super::r#trait::{
    ChangeSet, LedgerStore, PacketSnapshot, StoreError, WarehouseSnapshot,
};

fn upsert<E: Entity>(table: &mut HashMap<E::Id, E>, record: E) {
    table.insert(record.id().clone(), record);
}

#[derive(Debug, Default)]
struct Tables {
    warehouses: HashMap<WarehouseId, Warehouse>,
    documents: HashMap<SourceDocumentId, SourceDocument>,
    items: HashMap<SourceItemId, SourceDocumentItem>,
    packets: HashMap<PacketId, Packet>,
    codes: HashMap<String, PacketId>,
    layers: HashMap<(PacketId, WarehouseId), Vec<FifoLayer>>,
    /// (sequence number, movement), append-only.
    movements: Vec<(u64, StockMovement)>,
}

impl Tables {
    /// Reject the change set before anything is written.
    fn check(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let mut seen_codes = HashMap::new();
        for p in &changes.new_packets {
            if self.packets.contains_key(&p.id) {
                return Err(StoreError::Duplicate(format!("packet {} already exists", p.id)));
            }
            if self.codes.contains_key(&p.code)
                || seen_codes.insert(p.code.clone(), p.id).is_some()
            {
                return Err(StoreError::Duplicate(format!(
                    "packet code {} is already in use",
                    p.code
                )));
            }
        }
        for p in &changes.packets {
            match self.packets.get(&p.id) {
                Some(existing) if existing.code == p.code => {}
                Some(_) => {
                    return Err(StoreError::Duplicate(format!(
                        "packet {} code cannot change",
                        p.id
                    )));
                }
                None => return Err(StoreError::Unknown(format!("packet {}", p.id))),
            }
        }
        for d in &changes.documents {
            if self.documents.contains_key(&d.id) {
                return Err(StoreError::Duplicate(format!(
                    "source document {} already exists",
                    d.id
                )));
            }
        }
        for item in &changes.source_items {
            let is_new_line = changes.documents.iter().any(|d| d.id == item.document_id);
            if !is_new_line && !self.items.contains_key(&item.id) {
                return Err(StoreError::Unknown(format!("source item {}", item.id)));
            }
        }
        for stack in &changes.layer_stacks {
            let known = self.packets.contains_key(&stack.packet_id())
                || changes.new_packets.iter().any(|p| p.id == stack.packet_id());
            if !known {
                return Err(StoreError::Unknown(format!("packet {}", stack.packet_id())));
            }
        }
        Ok(())
    }
}

/// In-memory ledger store.
///
/// A single `RwLock` guards the committed tables: readers share it, and a
/// commit holds the write side only for the duration of the copy-in, so
/// staged work never blocks readers.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
    next_layer: AtomicU64,
    next_sequence: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_layer: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }
}

impl InMemoryLedgerStore {
    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn sorted_layers(layers: Option<&Vec<FifoLayer>>) -> Vec<FifoLayer> {
        let mut out = layers.cloned().unwrap_or_default();
        out.sort_by_key(|l| (l.created_at, l.id));
        out
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.read()?.warehouses.get(&id).cloned())
    }

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        let mut all: Vec<_> = self.read()?.warehouses.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    fn source_document(&self, id: SourceDocumentId) -> Result<Option<SourceDocument>, StoreError> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    fn source_item(&self, id: SourceItemId) -> Result<Option<SourceDocumentItem>, StoreError> {
        Ok(self.read()?.items.get(&id).cloned())
    }

    fn packet(&self, id: PacketId) -> Result<Option<Packet>, StoreError> {
        Ok(self.read()?.packets.get(&id).cloned())
    }

    fn packet_by_code(&self, code: &str) -> Result<Option<Packet>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .codes
            .get(code.trim())
            .and_then(|id| tables.packets.get(id))
            .cloned())
    }

    fn packet_snapshot(
        &self,
        id: PacketId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<PacketSnapshot>, StoreError> {
        let tables = self.read()?;
        let Some(packet) = tables.packets.get(&id).cloned() else {
            return Ok(None);
        };
        let layers = Self::sorted_layers(tables.layers.get(&(id, warehouse_id)));
        Ok(Some(PacketSnapshot { packet, layers }))
    }

    fn warehouse_snapshot(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Option<WarehouseSnapshot>, StoreError> {
        let tables = self.read()?;
        let Some(warehouse) = tables.warehouses.get(&warehouse_id).cloned() else {
            return Ok(None);
        };
        let packets = tables
            .packets
            .values()
            .filter(|p| p.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        let mut layers: Vec<FifoLayer> = tables
            .layers
            .iter()
            .filter(|((_, w), _)| *w == warehouse_id)
            .flat_map(|(_, ls)| ls.iter().cloned())
            .collect();
        layers.sort_by_key(|l| (l.created_at, l.id));
        let source_items = tables
            .items
            .values()
            .filter(|i| i.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        Ok(Some(WarehouseSnapshot {
            warehouse,
            packets,
            layers,
            source_items,
        }))
    }

    fn movements_for(&self, material_id: Uuid) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|(_, m)| m.material_id == material_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn movements_by_reference(
        &self,
        reference: ReferenceId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .read()?
            .movements
            .iter()
            .filter(|(_, m)| m.reference == reference)
            .map(|(_, m)| m.clone())
            .collect())
    }

    fn next_layer_id(&self) -> LayerId {
        LayerId(self.next_layer.fetch_add(1, Ordering::SeqCst))
    }

    fn commit(&self, changes: ChangeSet) -> Result<Vec<EventEnvelope<StockMovement>>, StoreError> {
        if changes.is_empty() {
            return Ok(vec![]);
        }

        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        tables.check(&changes)?;

        for w in changes.warehouses {
            upsert(&mut tables.warehouses, w);
        }
        for d in changes.documents {
            tables.documents.insert(d.id, d);
        }
        for item in changes.source_items {
            tables.items.insert(item.id, item);
        }
        for p in changes.new_packets.into_iter().chain(changes.packets) {
            tables.codes.insert(p.code.clone(), p.id);
            upsert(&mut tables.packets, p);
        }
        for stack in changes.layer_stacks {
            let key = (stack.packet_id(), stack.warehouse_id());
            tables.layers.insert(key, stack.into_layers());
        }

        let mut committed = Vec::with_capacity(changes.movements.len());
        for m in changes.movements {
            let seq = self.next_sequence.fetch_add(1, Ordering::SeqCst);
            committed.push(EventEnvelope::new(
                *m.id.as_uuid(),
                m.material_id,
                m.material_type.as_str(),
                seq,
                m.clone(),
            ));
            tables.movements.push((seq, m));
        }

        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gemledger_core::Carats;
    use gemledger_inventory::{LayerStack, MovementType, NewPacketSpec};

    fn warehouse() -> Warehouse {
        Warehouse::new(WarehouseId::new(), "Main vault", true, Utc::now()).unwrap()
    }

    fn packet(code: &str, warehouse_id: WarehouseId) -> Packet {
        Packet::create(PacketId::new(), &NewPacketSpec::raw(code), warehouse_id, Utc::now())
            .unwrap()
    }

    #[test]
    fn rejects_duplicate_codes_without_partial_write() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse();
        let first = packet("P-1", w.id);
        store
            .commit(ChangeSet {
                warehouses: vec![w.clone()],
                new_packets: vec![first],
                ..ChangeSet::default()
            })
            .unwrap();

        let dup = packet("P-1", w.id);
        let other = packet("P-2", w.id);
        let err = store
            .commit(ChangeSet {
                new_packets: vec![other.clone(), dup],
                ..ChangeSet::default()
            })
            .unwrap_err();

        assert!(matches!(err, StoreError::Duplicate(_)));
        assert!(store.packet(other.id).unwrap().is_none());
    }

    #[test]
    fn commit_assigns_monotonic_sequence_numbers() {
        let store = InMemoryLedgerStore::new();
        let w = warehouse();
        let p = packet("P-1", w.id);
        let movement = |kind| {
            StockMovement::for_packet(
                p.id,
                w.id,
                kind,
                Carats::ZERO,
                ReferenceId::new(),
                Utc::now(),
                serde_json::Value::Null,
            )
        };

        let first = store
            .commit(ChangeSet {
                warehouses: vec![w.clone()],
                new_packets: vec![p.clone()],
                layer_stacks: vec![LayerStack::new(p.id, w.id)],
                movements: vec![movement(MovementType::Assign)],
                ..ChangeSet::default()
            })
            .unwrap();
        let second = store
            .commit(ChangeSet {
                movements: vec![movement(MovementType::Return)],
                ..ChangeSet::default()
            })
            .unwrap();

        assert!(first[0].sequence_number() < second[0].sequence_number());
        assert_eq!(first[0].stream_type(), "packet");
        assert_eq!(store.movements_for(*p.id.as_uuid()).unwrap().len(), 2);
    }

    #[test]
    fn layer_ids_are_unique_and_increasing() {
        let store = InMemoryLedgerStore::new();
        let a = store.next_layer_id();
        let b = store.next_layer_id();
        assert!(a < b);
    }

    #[test]
    fn updates_to_unknown_packets_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let err = store
            .commit(ChangeSet {
                packets: vec![packet("GHOST", WarehouseId::new())],
                ..ChangeSet::default()
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Unknown(_)));
    }
}
