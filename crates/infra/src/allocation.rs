//! Allocation of goods-receipt remainders into packets.
//!
//! `allocate` turns part of a receipt line's unallocated quantity into FIFO
//! layers on packets. A batch is validated as a whole before anything is
//! staged, and executes as one unit of work: one failing line rejects every
//! line.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use gemledger_core::{
    Carats, DomainError, DomainResult, Money, PacketId, ReferenceId, SourceDocumentId,
    SourceItemId, WarehouseId,
};
use gemledger_inventory::{
    LayerId, MovementType, PacketTarget, ProvenanceKind, SourceDocument, StockMovement,
};

use crate::ledger_store::{LedgerKey, LedgerStore};
use crate::unit_of_work::{Committed, LedgerAccess};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub source_item_id: SourceItemId,
    pub target: PacketTarget,
    pub quantity: Carats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub source_document_id: SourceDocumentId,
    pub lines: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedLine {
    pub source_item_id: SourceItemId,
    pub packet_id: PacketId,
    pub packet_code: String,
    pub created_packet: bool,
    pub quantity: Carats,
    pub unit_price: Money,
    pub layer_ids: Vec<LayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub source_document_id: SourceDocumentId,
    /// Shared by every movement of this batch.
    pub reference: ReferenceId,
    pub lines: Vec<AllocatedLine>,
}

/// A line after validation, with its target resolved to a packet id (new
/// packets get their id before locking so the id can be part of the key set).
struct PlannedLine {
    item_id: SourceItemId,
    warehouse_id: WarehouseId,
    packet_id: PacketId,
    new_packet: Option<usize>,
    quantity: Carats,
}

#[derive(Debug, Clone)]
pub struct AllocationCoordinator<S> {
    access: LedgerAccess<S>,
}

impl<S: LedgerStore> AllocationCoordinator<S> {
    pub fn new(access: LedgerAccess<S>) -> Self {
        Self { access }
    }

    #[instrument(
        skip(self, request),
        fields(document = %request.source_document_id, lines = request.lines.len())
    )]
    pub fn allocate(&self, request: &AllocateRequest) -> DomainResult<Committed<AllocationResult>> {
        let document = self
            .access
            .store()
            .source_document(request.source_document_id)?
            .ok_or_else(|| {
                DomainError::not_found(format!("source document {}", request.source_document_id))
            })?;
        let plan = self.plan(&document, request)?;

        let keys: Vec<LedgerKey> = plan
            .iter()
            .flat_map(|line| {
                [
                    LedgerKey::source_item(line.item_id, line.warehouse_id),
                    LedgerKey::packet(line.packet_id, line.warehouse_id),
                ]
            })
            .collect();

        let reference = ReferenceId::new();
        let at = request.occurred_at;
        let committed = self.access.execute(keys, |uow| {
            // Re-check what concurrent work may have changed since planning.
            let mut per_item: BTreeMap<SourceItemId, Carats> = BTreeMap::new();
            for line in &plan {
                *per_item.entry(line.item_id).or_insert(Carats::ZERO) += line.quantity;
            }
            for (item_id, requested) in &per_item {
                let remaining = uow.source_item(*item_id)?.remaining_qty();
                if remaining < *requested {
                    return Err(DomainError::insufficient(remaining, *requested));
                }
            }
            for line in plan.iter().filter(|l| l.new_packet.is_none()) {
                uow.packet(line.packet_id)?.ensure_movable()?;
            }

            let mut allocated = Vec::with_capacity(plan.len());
            for line in &plan {
                let created_packet = match line.new_packet {
                    Some(index) => {
                        let PacketTarget::New(spec) = &request.lines[index].target else {
                            return Err(DomainError::storage("allocation plan out of sync"));
                        };
                        uow.create_packet(line.packet_id, spec, line.warehouse_id, at)?;
                        true
                    }
                    None => false,
                };

                let lots = uow.draw_source_item(line.item_id, line.quantity)?;
                let unit_price = lots.first().map(|l| l.unit_price).unwrap_or(Money::ZERO);
                let layer_ids = uow.produce(
                    line.packet_id,
                    line.warehouse_id,
                    &lots,
                    ProvenanceKind::Receipt,
                    reference,
                    at,
                )?;
                let packet_code = uow.packet(line.packet_id)?.code.clone();

                uow.record(StockMovement::for_packet(
                    line.packet_id,
                    line.warehouse_id,
                    MovementType::Receive,
                    line.quantity,
                    reference,
                    at,
                    json!({
                        "source_document_id": document.id,
                        "source_item_id": line.item_id,
                        "unit_price": unit_price,
                    }),
                ));

                allocated.push(AllocatedLine {
                    source_item_id: line.item_id,
                    packet_id: line.packet_id,
                    packet_code,
                    created_packet,
                    quantity: line.quantity,
                    unit_price,
                    layer_ids,
                });
            }

            Ok(AllocationResult {
                source_document_id: document.id,
                reference,
                lines: allocated,
            })
        })?;

        info!(
            reference = %reference,
            packets = committed.result.lines.len(),
            "allocation committed"
        );
        Ok(committed)
    }

    /// Validate the batch against committed state and resolve every target.
    fn plan(
        &self,
        document: &SourceDocument,
        request: &AllocateRequest,
    ) -> DomainResult<Vec<PlannedLine>> {
        if request.lines.is_empty() {
            return Err(DomainError::validation("allocation batch has no lines"));
        }

        let store = self.access.store();
        let mut new_codes = BTreeSet::new();
        let mut per_item: BTreeMap<SourceItemId, (Carats, Carats)> = BTreeMap::new();
        let mut plan = Vec::with_capacity(request.lines.len());

        for (index, line) in request.lines.iter().enumerate() {
            if !line.quantity.is_positive() {
                return Err(DomainError::validation(format!(
                    "line {}: quantity must be positive (got {})",
                    index + 1,
                    line.quantity
                )));
            }

            let item = store.source_item(line.source_item_id)?.ok_or_else(|| {
                DomainError::not_found(format!("source document item {}", line.source_item_id))
            })?;
            if item.document_id != document.id {
                return Err(DomainError::validation(format!(
                    "line {}: item {} does not belong to source document {}",
                    index + 1,
                    item.id,
                    document.id
                )));
            }

            let (packet_id, new_packet) = match &line.target {
                PacketTarget::Existing(packet_id) => {
                    let packet = store
                        .packet(*packet_id)?
                        .ok_or_else(|| DomainError::not_found(format!("packet {packet_id}")))?;
                    packet.ensure_in(item.warehouse_id)?;
                    packet.ensure_movable()?;
                    (packet.id, None)
                }
                PacketTarget::New(spec) => {
                    let code = spec.code.trim();
                    if code.is_empty() {
                        return Err(DomainError::validation(format!(
                            "line {}: new packet needs a code",
                            index + 1
                        )));
                    }
                    if !new_codes.insert(code.to_string()) {
                        return Err(DomainError::validation(format!(
                            "packet code {code} appears more than once in the batch"
                        )));
                    }
                    if store.packet_by_code(code)?.is_some() {
                        return Err(DomainError::validation(format!(
                            "packet code {code} is already in use"
                        )));
                    }
                    (PacketId::new(), Some(index))
                }
            };

            let entry = per_item
                .entry(item.id)
                .or_insert((item.remaining_qty(), Carats::ZERO));
            entry.1 += line.quantity;

            plan.push(PlannedLine {
                item_id: item.id,
                warehouse_id: item.warehouse_id,
                packet_id,
                new_packet,
                quantity: line.quantity,
            });
        }

        for (remaining, requested) in per_item.values() {
            if remaining < requested {
                return Err(DomainError::insufficient(*remaining, *requested));
            }
        }
        Ok(plan)
    }
}
