//! Inventory engine facade.
//!
//! Wires the ledger store, key locks, and event bus into the components and
//! gives callers one entry point per operation. Mutating operations are
//! retried on contention; their committed movements are published after
//! the commit.
//!
//! ```text
//! caller → engine (retry) → component (validate, lock, stage) → store.commit → bus.publish
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use gemledger_core::{
    DomainError, DomainResult, PacketId, ReferenceId, SourceDocumentId, SourceItemId, WarehouseId,
};
use gemledger_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use gemledger_inventory::{
    FifoLayer, MaterialType, Packet, SourceDocument, SourceDocumentItem, StockMovement, Warehouse,
};

use crate::allocation::{AllocateRequest, AllocationCoordinator, AllocationResult};
use crate::config::EngineConfig;
use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
use crate::lifecycle::{
    CustodyChange, MergeRequest, MergeResult, PacketLifecycleManager, SplitRequest, SplitResult,
};
use crate::locks::KeyLockTable;
use crate::projections::{AuditReport, PacketValuation, ValuationReporter, WarehouseValuation};
use crate::receiving::{PostReceipt, ReceivingService};
use crate::retry::RetryPolicy;
use crate::unit_of_work::{Committed, LedgerAccess};
use crate::warehouses::WarehouseRegistry;

pub type MovementEnvelope = EventEnvelope<StockMovement>;

#[derive(Debug)]
pub struct InventoryEngine<S, B> {
    store: Arc<S>,
    bus: B,
    retry: RetryPolicy,
    warehouses: WarehouseRegistry<Arc<S>>,
    receiving: ReceivingService<Arc<S>>,
    allocation: AllocationCoordinator<Arc<S>>,
    lifecycle: PacketLifecycleManager<Arc<S>>,
    valuation: ValuationReporter<Arc<S>>,
}

pub type InMemoryInventoryEngine =
    InventoryEngine<InMemoryLedgerStore, Arc<InMemoryEventBus<MovementEnvelope>>>;

impl InMemoryInventoryEngine {
    /// Engine over a fresh in-memory store and bus.
    pub fn in_memory(config: &EngineConfig) -> Self {
        InventoryEngine::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryEventBus::new()),
            config,
        )
    }
}

impl<S, B> InventoryEngine<S, B>
where
    S: LedgerStore,
    B: EventBus<MovementEnvelope>,
{
    pub fn new(store: Arc<S>, bus: B, config: &EngineConfig) -> Self {
        let access = LedgerAccess::new(
            store.clone(),
            Arc::new(KeyLockTable::new()),
            config.lock_timeout(),
        );
        Self {
            warehouses: WarehouseRegistry::new(store.clone()),
            receiving: ReceivingService::new(access.clone()),
            allocation: AllocationCoordinator::new(access.clone()),
            lifecycle: PacketLifecycleManager::new(access),
            valuation: ValuationReporter::new(store.clone()),
            retry: config.retry_policy(),
            store,
            bus,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Subscribe to movements committed from now on.
    pub fn subscribe(&self) -> Subscription<MovementEnvelope> {
        self.bus.subscribe()
    }

    fn publish(&self, movements: Vec<MovementEnvelope>) {
        for envelope in movements {
            let sequence = envelope.sequence_number();
            if let Err(err) = self.bus.publish(envelope) {
                // Already committed; consumers can rebuild from the store.
                error!(sequence, error = ?err, "failed to publish stock movement");
            }
        }
    }

    fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> DomainResult<Committed<T>>,
    ) -> DomainResult<T> {
        let committed = self.retry.run(operation, |_| op()).inspect_err(|err| {
            if err.is_transient() {
                warn!(operation, error = %err, "retry budget exhausted");
            }
        })?;
        self.publish(committed.movements);
        Ok(committed.result)
    }

    // Warehouses

    pub fn create_warehouse(&self, name: &str, is_default: bool) -> DomainResult<Warehouse> {
        self.warehouses.create(name, is_default, Utc::now())
    }

    pub fn rename_warehouse(&self, id: WarehouseId, name: &str) -> DomainResult<Warehouse> {
        self.warehouses.rename(id, name)
    }

    pub fn set_default_warehouse(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        self.warehouses.set_default(id)
    }

    pub fn warehouse(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        self.warehouses.get(id)
    }

    pub fn list_warehouses(&self) -> DomainResult<Vec<Warehouse>> {
        self.warehouses.list()
    }

    pub fn default_warehouse(&self) -> DomainResult<Option<Warehouse>> {
        self.warehouses.default_warehouse()
    }

    // Receiving and allocation

    pub fn post_receipt(&self, receipt: &PostReceipt) -> DomainResult<SourceDocument> {
        self.run("post_receipt", || self.receiving.post_receipt(receipt))
    }

    pub fn source_document(&self, id: SourceDocumentId) -> DomainResult<SourceDocument> {
        self.store
            .source_document(id)?
            .ok_or_else(|| DomainError::not_found(format!("source document {id}")))
    }

    pub fn source_item(&self, id: SourceItemId) -> DomainResult<SourceDocumentItem> {
        self.store
            .source_item(id)?
            .ok_or_else(|| DomainError::not_found(format!("source document item {id}")))
    }

    pub fn allocate(&self, request: &AllocateRequest) -> DomainResult<AllocationResult> {
        self.run("allocate", || self.allocation.allocate(request))
    }

    pub fn receive_into_raw_packet(
        &self,
        source_item_id: SourceItemId,
        packet_code: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<AllocationResult> {
        self.run("receive_into_raw_packet", || {
            self.receiving
                .receive_into_raw_packet(source_item_id, packet_code, occurred_at)
        })
    }

    // Packet lifecycle

    pub fn split(&self, request: &SplitRequest) -> DomainResult<SplitResult> {
        self.run("split", || self.lifecycle.split(request))
    }

    pub fn merge(&self, request: &MergeRequest) -> DomainResult<MergeResult> {
        self.run("merge", || self.lifecycle.merge(request))
    }

    pub fn assign(
        &self,
        packet_id: PacketId,
        work_order: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<CustodyChange> {
        self.run("assign", || self.lifecycle.assign(packet_id, work_order, occurred_at))
    }

    pub fn return_packet(
        &self,
        packet_id: PacketId,
        work_order: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<CustodyChange> {
        self.run("return_packet", || {
            self.lifecycle.return_packet(packet_id, work_order, occurred_at)
        })
    }

    // Queries

    pub fn packet(&self, id: PacketId) -> DomainResult<Packet> {
        self.store
            .packet(id)?
            .ok_or_else(|| DomainError::not_found(format!("packet {id}")))
    }

    pub fn packet_by_code(&self, code: &str) -> DomainResult<Packet> {
        self.store
            .packet_by_code(code)?
            .ok_or_else(|| DomainError::not_found(format!("packet {}", code.trim())))
    }

    /// Every packet homed in the warehouse, depleted ones included, by code.
    pub fn packets_in_warehouse(&self, warehouse_id: WarehouseId) -> DomainResult<Vec<Packet>> {
        let mut packets = self
            .store
            .warehouse_snapshot(warehouse_id)?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {warehouse_id}")))?
            .packets;
        packets.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(packets)
    }

    /// Movements of one material, in append order.
    pub fn movements_for(
        &self,
        material_type: MaterialType,
        material_id: Uuid,
    ) -> DomainResult<Vec<StockMovement>> {
        Ok(self
            .store
            .movements_for(material_id)?
            .into_iter()
            .filter(|m| m.material_type == material_type)
            .collect())
    }

    pub fn movements_by_reference(
        &self,
        reference: ReferenceId,
    ) -> DomainResult<Vec<StockMovement>> {
        Ok(self.store.movements_by_reference(reference)?)
    }

    // Valuation

    pub fn packet_valuation(
        &self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<PacketValuation> {
        self.valuation.packet_valuation(packet_id, warehouse_id)
    }

    pub fn warehouse_valuation(
        &self,
        warehouse_id: WarehouseId,
    ) -> DomainResult<WarehouseValuation> {
        self.valuation.warehouse_valuation(warehouse_id)
    }

    pub fn fifo_layers(
        &self,
        packet_id: PacketId,
        warehouse_id: WarehouseId,
    ) -> DomainResult<Vec<FifoLayer>> {
        self.valuation.fifo_layers(packet_id, warehouse_id)
    }

    pub fn audit_warehouse(&self, warehouse_id: WarehouseId) -> DomainResult<AuditReport> {
        self.valuation.audit_warehouse(warehouse_id)
    }

    pub fn valuation(&self) -> &ValuationReporter<Arc<S>> {
        &self.valuation
    }
}
