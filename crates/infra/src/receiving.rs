//! Goods-receipt intake.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use gemledger_core::{
    Carats, DomainError, DomainResult, Money, ReferenceId, SourceDocumentId, SourceItemId,
    WarehouseId,
};
use gemledger_inventory::{
    MovementType, NewPacketSpec, PacketTarget, SourceDocument, SourceDocumentItem, StockMovement,
};

use crate::allocation::{AllocateRequest, AllocationCoordinator, AllocationLine, AllocationResult};
use crate::ledger_store::{ChangeSet, LedgerStore};
use crate::unit_of_work::{Committed, LedgerAccess};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub received_qty: Carats,
    pub unit_price: Money,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReceipt {
    /// Assigned by the receiving side; posting the same id twice is rejected.
    pub source_document_id: SourceDocumentId,
    pub warehouse_id: WarehouseId,
    pub reference: String,
    pub lines: Vec<ReceiptLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReceivingService<S> {
    access: LedgerAccess<S>,
    allocation: AllocationCoordinator<S>,
}

impl<S: LedgerStore + Clone> ReceivingService<S> {
    pub fn new(access: LedgerAccess<S>) -> Self {
        Self {
            allocation: AllocationCoordinator::new(access.clone()),
            access,
        }
    }
}

impl<S: LedgerStore> ReceivingService<S> {
    /// Register a goods-receipt document and its lines, all unallocated.
    #[instrument(
        skip(self, receipt),
        fields(document = %receipt.source_document_id, lines = receipt.lines.len())
    )]
    pub fn post_receipt(&self, receipt: &PostReceipt) -> DomainResult<Committed<SourceDocument>> {
        let store = self.access.store();
        if store.warehouse(receipt.warehouse_id)?.is_none() {
            return Err(DomainError::not_found(format!("warehouse {}", receipt.warehouse_id)));
        }
        if receipt.reference.trim().is_empty() {
            return Err(DomainError::validation("receipt reference cannot be empty"));
        }
        if receipt.lines.is_empty() {
            return Err(DomainError::validation("receipt has no lines"));
        }

        let at = receipt.occurred_at;
        let reference = ReferenceId::from_uuid(*receipt.source_document_id.as_uuid());
        let items = receipt
            .lines
            .iter()
            .map(|line| {
                SourceDocumentItem::new(
                    SourceItemId::new(),
                    receipt.source_document_id,
                    receipt.warehouse_id,
                    line.received_qty,
                    line.unit_price,
                    line.description.clone(),
                    at,
                )
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let document = SourceDocument {
            id: receipt.source_document_id,
            warehouse_id: receipt.warehouse_id,
            reference: receipt.reference.trim().to_string(),
            item_ids: items.iter().map(|i| i.id).collect(),
            posted_at: at,
        };
        let movements = items
            .iter()
            .map(|item| {
                StockMovement::for_source_item(
                    item.id,
                    item.warehouse_id,
                    MovementType::Receive,
                    item.received_qty,
                    reference,
                    at,
                    json!({ "unit_price": item.unit_price, "document": document.reference }),
                )
            })
            .collect();

        // Fresh ids only, so there is nothing to lock: the store rejects a
        // document id that already exists.
        let committed = store.commit(ChangeSet {
            documents: vec![document.clone()],
            source_items: items,
            movements,
            ..ChangeSet::default()
        })?;

        info!(reference = %document.reference, "receipt posted");
        Ok(Committed {
            result: document,
            movements: committed,
        })
    }

    /// Allocate the whole remainder of one receipt line into a new raw
    /// packet. Goes through the regular allocation path.
    #[instrument(skip(self), fields(item = %source_item_id))]
    pub fn receive_into_raw_packet(
        &self,
        source_item_id: SourceItemId,
        packet_code: &str,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Committed<AllocationResult>> {
        let item = self
            .access
            .store()
            .source_item(source_item_id)?
            .ok_or_else(|| {
                DomainError::not_found(format!("source document item {source_item_id}"))
            })?;
        let remaining = item.remaining_qty();
        if remaining.is_zero() {
            return Err(DomainError::validation(format!(
                "source document item {source_item_id} is fully allocated"
            )));
        }

        self.allocation.allocate(&AllocateRequest {
            source_document_id: item.document_id,
            lines: vec![AllocationLine {
                source_item_id,
                target: PacketTarget::New(NewPacketSpec::raw(packet_code)),
                quantity: remaining,
            }],
            occurred_at,
        })
    }
}
