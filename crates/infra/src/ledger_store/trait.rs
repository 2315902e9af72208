use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gemledger_core::{
    DomainError, PacketId, ReferenceId, SourceDocumentId, SourceItemId, WarehouseId,
};
use gemledger_events::EventEnvelope;
use gemledger_inventory::{
    FifoLayer, LayerId, LayerStack, Packet, SourceDocument, SourceDocumentItem, StockMovement,
    Warehouse,
};
use uuid::Uuid;

/// The material half of a lock/storage key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MaterialKey {
    Packet(PacketId),
    SourceItem(SourceItemId),
}

/// Unit of mutual exclusion: one material in one warehouse.
///
/// Ordering is total and stable, so sorting a set of keys gives every
/// operation the same acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub material: MaterialKey,
    pub warehouse_id: WarehouseId,
}

impl LedgerKey {
    pub fn packet(packet_id: PacketId, warehouse_id: WarehouseId) -> Self {
        Self {
            material: MaterialKey::Packet(packet_id),
            warehouse_id,
        }
    }

    pub fn source_item(item_id: SourceItemId, warehouse_id: WarehouseId) -> Self {
        Self {
            material: MaterialKey::SourceItem(item_id),
            warehouse_id,
        }
    }
}

impl core::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.material {
            MaterialKey::Packet(id) => write!(f, "packet:{id}@{}", self.warehouse_id),
            MaterialKey::SourceItem(id) => write!(f, "source_item:{id}@{}", self.warehouse_id),
        }
    }
}

/// Everything one operation writes, applied atomically by [`LedgerStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub warehouses: Vec<Warehouse>,
    /// Must not exist yet.
    pub documents: Vec<SourceDocument>,
    /// Inserts (alongside a new document) or updates.
    pub source_items: Vec<SourceDocumentItem>,
    /// Must not exist yet; codes must be unused.
    pub new_packets: Vec<Packet>,
    /// Updates to existing packets.
    pub packets: Vec<Packet>,
    /// Full replacement of the layers of each (packet, warehouse).
    pub layer_stacks: Vec<LayerStack>,
    pub movements: Vec<StockMovement>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.warehouses.is_empty()
            && self.documents.is_empty()
            && self.source_items.is_empty()
            && self.new_packets.is_empty()
            && self.packets.is_empty()
            && self.layer_stacks.is_empty()
            && self.movements.is_empty()
    }
}

/// A packet plus its layers in one warehouse, read under a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSnapshot {
    pub packet: Packet,
    pub layers: Vec<FifoLayer>,
}

/// Every packet homed in a warehouse plus every layer held there, read under
/// a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseSnapshot {
    pub warehouse: Warehouse,
    pub packets: Vec<Packet>,
    pub layers: Vec<FifoLayer>,
    pub source_items: Vec<SourceDocumentItem>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("unknown record: {0}")]
    Unknown(String),
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Poisoned => DomainError::storage("store lock poisoned"),
            StoreError::Duplicate(msg) => DomainError::validation(msg),
            StoreError::Unknown(msg) => DomainError::not_found(msg),
        }
    }
}

/// Keyed ledger storage.
///
/// Implementations must:
/// - make every [`ChangeSet`] visible all at once or not at all
/// - never expose staged (uncommitted) data to readers
/// - assign movement sequence numbers monotonically at commit
/// - hand out layer ids from a monotonic sequence
///
/// Mutual exclusion between writers is not the store's concern; callers hold
/// the relevant [`LedgerKey`] locks across load → stage → commit.
pub trait LedgerStore: Send + Sync {
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError>;

    fn source_document(&self, id: SourceDocumentId) -> Result<Option<SourceDocument>, StoreError>;

    fn source_item(&self, id: SourceItemId) -> Result<Option<SourceDocumentItem>, StoreError>;

    fn packet(&self, id: PacketId) -> Result<Option<Packet>, StoreError>;

    fn packet_by_code(&self, code: &str) -> Result<Option<Packet>, StoreError>;

    fn packet_snapshot(
        &self,
        id: PacketId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<PacketSnapshot>, StoreError>;

    fn warehouse_snapshot(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Option<WarehouseSnapshot>, StoreError>;

    /// Movements for one material in append order.
    fn movements_for(&self, material_id: Uuid) -> Result<Vec<StockMovement>, StoreError>;

    fn movements_by_reference(
        &self,
        reference: ReferenceId,
    ) -> Result<Vec<StockMovement>, StoreError>;

    fn next_layer_id(&self) -> LayerId;

    /// Apply a change set atomically. Returns the committed movements wrapped
    /// for publication, in commit order.
    fn commit(&self, changes: ChangeSet) -> Result<Vec<EventEnvelope<StockMovement>>, StoreError>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn warehouse(&self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        (**self).warehouse(id)
    }

    fn warehouses(&self) -> Result<Vec<Warehouse>, StoreError> {
        (**self).warehouses()
    }

    fn source_document(&self, id: SourceDocumentId) -> Result<Option<SourceDocument>, StoreError> {
        (**self).source_document(id)
    }

    fn source_item(&self, id: SourceItemId) -> Result<Option<SourceDocumentItem>, StoreError> {
        (**self).source_item(id)
    }

    fn packet(&self, id: PacketId) -> Result<Option<Packet>, StoreError> {
        (**self).packet(id)
    }

    fn packet_by_code(&self, code: &str) -> Result<Option<Packet>, StoreError> {
        (**self).packet_by_code(code)
    }

    fn packet_snapshot(
        &self,
        id: PacketId,
        warehouse_id: WarehouseId,
    ) -> Result<Option<PacketSnapshot>, StoreError> {
        (**self).packet_snapshot(id, warehouse_id)
    }

    fn warehouse_snapshot(
        &self,
        warehouse_id: WarehouseId,
    ) -> Result<Option<WarehouseSnapshot>, StoreError> {
        (**self).warehouse_snapshot(warehouse_id)
    }

    fn movements_for(&self, material_id: Uuid) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_for(material_id)
    }

    fn movements_by_reference(
        &self,
        reference: ReferenceId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements_by_reference(reference)
    }

    fn next_layer_id(&self) -> LayerId {
        (**self).next_layer_id()
    }

    fn commit(&self, changes: ChangeSet) -> Result<Vec<EventEnvelope<StockMovement>>, StoreError> {
        (**self).commit(changes)
    }
}
