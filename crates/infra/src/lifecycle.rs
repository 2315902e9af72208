//! Packet lifecycle: split, merge, and work-order custody.
//!
//! Split and merge move stock lot by lot: each consumed slice of a source
//! layer becomes a new layer on the destination with the same unit price and
//! a link back to the layer it was cut from. Assign/return only change
//! custody; layers are never touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use gemledger_core::{Carats, DomainError, DomainResult, Money, PacketId, ReferenceId, WarehouseId};
use gemledger_inventory::{
    LayerId, MovementType, PacketStatus, PacketTarget, ProvenanceKind, StockMovement, lots_value,
};

use crate::ledger_store::{LedgerKey, LedgerStore};
use crate::unit_of_work::{Committed, LedgerAccess};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub source_packet_id: PacketId,
    pub warehouse_id: WarehouseId,
    pub quantity: Carats,
    /// Usually a new packet; an existing one is accepted too.
    pub target: PacketTarget,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResult {
    pub reference: ReferenceId,
    pub source_packet_id: PacketId,
    pub new_packet_id: PacketId,
    pub created_packet: bool,
    pub quantity: Carats,
    /// Cost basis that moved with the stock.
    pub moved_value: Money,
    pub remaining_on_source: Carats,
    pub layer_ids: Vec<LayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub source_packet_id: PacketId,
    pub target_packet_id: PacketId,
    pub warehouse_id: WarehouseId,
    pub quantity: Carats,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub reference: ReferenceId,
    pub source_packet_id: PacketId,
    pub target_packet_id: PacketId,
    pub quantity: Carats,
    pub moved_value: Money,
    pub remaining_on_source: Carats,
    pub source_depleted: bool,
    pub target_available: Carats,
    pub layer_ids: Vec<LayerId>,
}

/// Outcome of an assign or a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyChange {
    pub reference: ReferenceId,
    pub packet_id: PacketId,
    pub work_order: String,
    pub status: PacketStatus,
    /// Carats held by the packet at the time of the change.
    pub quantity: Carats,
}

fn ensure_warehouse<S: LedgerStore>(store: &S, warehouse_id: WarehouseId) -> DomainResult<()> {
    if store.warehouse(warehouse_id)?.is_none() {
        return Err(DomainError::not_found(format!("warehouse {warehouse_id}")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PacketLifecycleManager<S> {
    access: LedgerAccess<S>,
}

impl<S: LedgerStore> PacketLifecycleManager<S> {
    pub fn new(access: LedgerAccess<S>) -> Self {
        Self { access }
    }

    #[instrument(
        skip(self, request),
        fields(
            source = %request.source_packet_id,
            warehouse = %request.warehouse_id,
            quantity = %request.quantity
        )
    )]
    pub fn split(&self, request: &SplitRequest) -> DomainResult<Committed<SplitResult>> {
        if !request.quantity.is_positive() {
            return Err(DomainError::validation(format!(
                "split quantity must be positive (got {})",
                request.quantity
            )));
        }
        let store = self.access.store();
        ensure_warehouse(store, request.warehouse_id)?;
        let source = store
            .packet(request.source_packet_id)?
            .ok_or_else(|| DomainError::not_found(format!("packet {}", request.source_packet_id)))?;
        source.ensure_in(request.warehouse_id)?;

        let (target_id, new_spec) = match &request.target {
            PacketTarget::Existing(id) => {
                if *id == source.id {
                    return Err(DomainError::validation("cannot split a packet into itself"));
                }
                let target = store
                    .packet(*id)?
                    .ok_or_else(|| DomainError::not_found(format!("packet {id}")))?;
                target.ensure_in(request.warehouse_id)?;
                (target.id, None)
            }
            PacketTarget::New(spec) => {
                if store.packet_by_code(&spec.code)?.is_some() {
                    return Err(DomainError::validation(format!(
                        "packet code {} is already in use",
                        spec.code.trim()
                    )));
                }
                (PacketId::new(), Some(spec))
            }
        };

        let warehouse_id = request.warehouse_id;
        let at = request.occurred_at;
        let reference = ReferenceId::new();
        let keys = [
            LedgerKey::packet(source.id, warehouse_id),
            LedgerKey::packet(target_id, warehouse_id),
        ];

        let committed = self.access.execute(keys, |uow| {
            if let Some(spec) = new_spec {
                uow.create_packet(target_id, spec, warehouse_id, at)?;
            }
            uow.record(StockMovement::for_packet(
                source.id,
                warehouse_id,
                MovementType::Split,
                -request.quantity,
                reference,
                at,
                json!({ "counterpart": target_id }),
            ));
            uow.record(StockMovement::for_packet(
                target_id,
                warehouse_id,
                MovementType::Split,
                request.quantity,
                reference,
                at,
                json!({ "counterpart": source.id }),
            ));

            let lots =
                uow.consume_packet(source.id, warehouse_id, request.quantity, reference, at)?;
            let layer_ids =
                uow.produce(target_id, warehouse_id, &lots, ProvenanceKind::Split, reference, at)?;

            Ok(SplitResult {
                reference,
                source_packet_id: source.id,
                new_packet_id: target_id,
                created_packet: new_spec.is_some(),
                quantity: request.quantity,
                moved_value: Money::new(lots_value(&lots)?),
                remaining_on_source: uow.available(source.id, warehouse_id)?,
                layer_ids,
            })
        })?;

        info!(
            reference = %reference,
            target = %target_id,
            remaining_on_source = %committed.result.remaining_on_source,
            "split committed"
        );
        Ok(committed)
    }

    #[instrument(
        skip(self, request),
        fields(
            source = %request.source_packet_id,
            target = %request.target_packet_id,
            quantity = %request.quantity
        )
    )]
    pub fn merge(&self, request: &MergeRequest) -> DomainResult<Committed<MergeResult>> {
        if !request.quantity.is_positive() {
            return Err(DomainError::validation(format!(
                "merge quantity must be positive (got {})",
                request.quantity
            )));
        }
        if request.source_packet_id == request.target_packet_id {
            return Err(DomainError::validation("cannot merge a packet into itself"));
        }
        let store = self.access.store();
        ensure_warehouse(store, request.warehouse_id)?;
        for id in [request.source_packet_id, request.target_packet_id] {
            store
                .packet(id)?
                .ok_or_else(|| DomainError::not_found(format!("packet {id}")))?
                .ensure_in(request.warehouse_id)?;
        }

        let (source_id, target_id) = (request.source_packet_id, request.target_packet_id);
        let warehouse_id = request.warehouse_id;
        let at = request.occurred_at;
        let reference = ReferenceId::new();
        let keys = [
            LedgerKey::packet(source_id, warehouse_id),
            LedgerKey::packet(target_id, warehouse_id),
        ];

        let committed = self.access.execute(keys, |uow| {
            uow.record(StockMovement::for_packet(
                source_id,
                warehouse_id,
                MovementType::Merge,
                -request.quantity,
                reference,
                at,
                json!({ "counterpart": target_id }),
            ));
            uow.record(StockMovement::for_packet(
                target_id,
                warehouse_id,
                MovementType::Merge,
                request.quantity,
                reference,
                at,
                json!({ "counterpart": source_id }),
            ));

            // Validate the target before the source is drained.
            uow.packet(target_id)?.ensure_movable()?;
            let lots =
                uow.consume_packet(source_id, warehouse_id, request.quantity, reference, at)?;
            let layer_ids =
                uow.produce(target_id, warehouse_id, &lots, ProvenanceKind::Merge, reference, at)?;

            let remaining_on_source = uow.available(source_id, warehouse_id)?;
            Ok(MergeResult {
                reference,
                source_packet_id: source_id,
                target_packet_id: target_id,
                quantity: request.quantity,
                moved_value: Money::new(lots_value(&lots)?),
                remaining_on_source,
                source_depleted: uow.packet(source_id)?.status == PacketStatus::Depleted,
                target_available: uow.available(target_id, warehouse_id)?,
                layer_ids,
            })
        })?;

        info!(
            reference = %reference,
            source_depleted = committed.result.source_depleted,
            "merge committed"
        );
        Ok(committed)
    }

    /// Issue a packet to a work order. Its FIFO layers are left as they are.
    #[instrument(skip(self, work_order), fields(packet = %packet_id))]
    pub fn assign(
        &self,
        packet_id: PacketId,
        work_order: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Committed<CustodyChange>> {
        self.change_custody(packet_id, work_order, occurred_at, MovementType::Assign)
    }

    /// Take a packet back from the work order it was issued to.
    #[instrument(skip(self, work_order), fields(packet = %packet_id))]
    pub fn return_packet(
        &self,
        packet_id: PacketId,
        work_order: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Committed<CustodyChange>> {
        self.change_custody(packet_id, work_order, occurred_at, MovementType::Return)
    }

    fn change_custody(
        &self,
        packet_id: PacketId,
        work_order: &str,
        at: DateTime<Utc>,
        movement_type: MovementType,
    ) -> DomainResult<Committed<CustodyChange>> {
        let packet = self
            .access
            .store()
            .packet(packet_id)?
            .ok_or_else(|| DomainError::not_found(format!("packet {packet_id}")))?;
        let warehouse_id = packet.warehouse_id;
        let reference = ReferenceId::new();

        let committed = self
            .access
            .execute([LedgerKey::packet(packet_id, warehouse_id)], |uow| {
                let available = uow.available(packet_id, warehouse_id)?;
                let packet = uow.packet_mut(packet_id)?;
                let (work_order, quantity) = match movement_type {
                    MovementType::Assign => {
                        packet.assign(work_order, available)?;
                        (work_order.trim().to_string(), -available)
                    }
                    _ => (packet.release(work_order, available)?, available),
                };
                let status = packet.status;

                uow.record(StockMovement::for_packet(
                    packet_id,
                    warehouse_id,
                    movement_type,
                    quantity,
                    reference,
                    at,
                    json!({ "work_order": work_order }),
                ));
                Ok(CustodyChange {
                    reference,
                    packet_id,
                    work_order,
                    status,
                    quantity: available,
                })
            })?;

        info!(
            reference = %reference,
            status = ?committed.result.status,
            "packet custody changed"
        );
        Ok(committed)
    }
}
