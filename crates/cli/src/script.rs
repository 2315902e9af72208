//! Script format and replay.
//!
//! Warehouses are named, receipts are keyed by their reference, and packets
//! by code. A `to` packet code that does not exist yet creates a new packet.

use std::collections::HashMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gemledger_core::{Carats, DomainError, Money, SourceDocumentId, WarehouseId};
use gemledger_infra::{
    AllocateRequest, AllocationLine, AuditReport, InMemoryInventoryEngine, MergeRequest,
    PostReceipt, ReceiptLine, SplitRequest, WarehouseValuation,
};
use gemledger_inventory::{NewPacketSpec, PacketAttributes, PacketTarget, SourceDocument};

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptReceiptLine {
    pub received_qty: Carats,
    pub unit_price: Money,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptAllocation {
    /// Index of the receipt line.
    pub line: usize,
    pub to: String,
    pub quantity: Carats,
    #[serde(default)]
    pub attributes: PacketAttributes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    CreateWarehouse {
        name: String,
        #[serde(default)]
        default: bool,
    },
    Receive {
        #[serde(default)]
        warehouse: Option<String>,
        reference: String,
        lines: Vec<ScriptReceiptLine>,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Allocate {
        receipt: String,
        lines: Vec<ScriptAllocation>,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    ReceiveRaw {
        receipt: String,
        line: usize,
        packet: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Split {
        from: String,
        to: String,
        quantity: Carats,
        #[serde(default)]
        attributes: PacketAttributes,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Merge {
        from: String,
        into: String,
        quantity: Carats,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Assign {
        packet: String,
        work_order: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Return {
        packet: String,
        work_order: String,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WarehouseReport {
    pub valuation: WarehouseValuation,
    pub audit: AuditReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub warehouses: Vec<WarehouseReport>,
}

struct Replay<'a> {
    engine: &'a InMemoryInventoryEngine,
    warehouses: HashMap<String, WarehouseId>,
    receipts: HashMap<String, SourceDocument>,
}

impl<'a> Replay<'a> {
    fn warehouse(&self, name: Option<&str>) -> anyhow::Result<WarehouseId> {
        match name {
            Some(name) => self
                .warehouses
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("unknown warehouse {name}")),
            None => self
                .engine
                .default_warehouse()?
                .map(|w| w.id)
                .ok_or_else(|| anyhow!("no default warehouse")),
        }
    }

    fn receipt(&self, reference: &str) -> anyhow::Result<&SourceDocument> {
        self.receipts
            .get(reference)
            .ok_or_else(|| anyhow!("unknown receipt {reference}"))
    }

    /// Existing packet by code, or a spec for a new one.
    fn target(&self, code: &str, attributes: &PacketAttributes) -> anyhow::Result<PacketTarget> {
        match self.engine.packet_by_code(code) {
            Ok(packet) => Ok(PacketTarget::Existing(packet.id)),
            Err(DomainError::NotFound(_)) => Ok(PacketTarget::New(NewPacketSpec {
                code: code.to_string(),
                attributes: attributes.clone(),
            })),
            Err(err) => Err(err.into()),
        }
    }

    fn apply(&mut self, op: &Op) -> anyhow::Result<()> {
        let engine = self.engine;
        match op {
            Op::CreateWarehouse { name, default } => {
                let warehouse = engine.create_warehouse(name, *default)?;
                self.warehouses.insert(name.clone(), warehouse.id);
            }
            Op::Receive {
                warehouse,
                reference,
                lines,
                at,
            } => {
                let document = engine.post_receipt(&PostReceipt {
                    source_document_id: SourceDocumentId::new(),
                    warehouse_id: self.warehouse(warehouse.as_deref())?,
                    reference: reference.clone(),
                    lines: lines
                        .iter()
                        .map(|l| ReceiptLine {
                            received_qty: l.received_qty,
                            unit_price: l.unit_price,
                            description: l.description.clone(),
                        })
                        .collect(),
                    occurred_at: at.unwrap_or_else(Utc::now),
                })?;
                self.receipts.insert(reference.clone(), document);
            }
            Op::Allocate { receipt, lines, at } => {
                let document = self.receipt(receipt)?;
                let mut request = AllocateRequest {
                    source_document_id: document.id,
                    lines: Vec::with_capacity(lines.len()),
                    occurred_at: at.unwrap_or_else(Utc::now),
                };
                for line in lines {
                    let source_item_id = *document
                        .item_ids
                        .get(line.line)
                        .ok_or_else(|| anyhow!("receipt {receipt} has no line {}", line.line))?;
                    request.lines.push(AllocationLine {
                        source_item_id,
                        target: self.target(&line.to, &line.attributes)?,
                        quantity: line.quantity,
                    });
                }
                engine.allocate(&request)?;
            }
            Op::ReceiveRaw {
                receipt,
                line,
                packet,
                at,
            } => {
                let source_item_id = *self
                    .receipt(receipt)?
                    .item_ids
                    .get(*line)
                    .ok_or_else(|| anyhow!("receipt {receipt} has no line {line}"))?;
                let at = at.unwrap_or_else(Utc::now);
                engine.receive_into_raw_packet(source_item_id, packet, at)?;
            }
            Op::Split {
                from,
                to,
                quantity,
                attributes,
                at,
            } => {
                let source = engine.packet_by_code(from)?;
                engine.split(&SplitRequest {
                    source_packet_id: source.id,
                    warehouse_id: source.warehouse_id,
                    quantity: *quantity,
                    target: self.target(to, attributes)?,
                    occurred_at: at.unwrap_or_else(Utc::now),
                })?;
            }
            Op::Merge {
                from,
                into,
                quantity,
                at,
            } => {
                let source = engine.packet_by_code(from)?;
                let target = engine.packet_by_code(into)?;
                engine.merge(&MergeRequest {
                    source_packet_id: source.id,
                    target_packet_id: target.id,
                    warehouse_id: source.warehouse_id,
                    quantity: *quantity,
                    occurred_at: at.unwrap_or_else(Utc::now),
                })?;
            }
            Op::Assign {
                packet,
                work_order,
                at,
            } => {
                let packet = engine.packet_by_code(packet)?;
                engine.assign(packet.id, work_order, at.unwrap_or_else(Utc::now))?;
            }
            Op::Return {
                packet,
                work_order,
                at,
            } => {
                let packet = engine.packet_by_code(packet)?;
                engine.return_packet(packet.id, work_order, at.unwrap_or_else(Utc::now))?;
            }
        }
        Ok(())
    }
}

/// Apply every operation in order, stopping at the first failure.
pub fn run(engine: &InMemoryInventoryEngine, script: &Script) -> anyhow::Result<Report> {
    let mut replay = Replay {
        engine,
        warehouses: HashMap::new(),
        receipts: HashMap::new(),
    };
    for (index, op) in script.ops.iter().enumerate() {
        replay
            .apply(op)
            .with_context(|| format!("operation #{index} failed"))?;
    }

    let mut warehouses = Vec::new();
    for warehouse in engine.list_warehouses()? {
        warehouses.push(WarehouseReport {
            valuation: engine.warehouse_valuation(warehouse.id)?,
            audit: engine.audit_warehouse(warehouse.id)?,
        });
    }
    Ok(Report { warehouses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemledger_infra::EngineConfig;

    const SCRIPT: &str = r#"{
      "ops": [
        { "op": "create_warehouse", "name": "Main", "default": true },
        { "op": "receive", "reference": "GRN-1", "lines": [
            { "received_qty": "10", "unit_price": "5000" },
            { "received_qty": "2.5", "unit_price": "7000" }
        ] },
        { "op": "allocate", "receipt": "GRN-1", "lines": [
            { "line": 0, "to": "P1", "quantity": "4" },
            { "line": 0, "to": "P2", "quantity": "6", "attributes": { "shape": "round" } }
        ] },
        { "op": "receive_raw", "receipt": "GRN-1", "line": 1, "packet": "RAW-1" },
        { "op": "split", "from": "P1", "to": "P3", "quantity": "1.5" },
        { "op": "merge", "from": "RAW-1", "into": "P3", "quantity": "2.5" },
        { "op": "assign", "packet": "P2", "work_order": "WO-7" },
        { "op": "return", "packet": "P2", "work_order": "WO-7" }
      ]
    }"#;

    #[test]
    fn script_replays_and_values_the_warehouse() {
        let script: Script = serde_json::from_str(SCRIPT).unwrap();
        let engine = InMemoryInventoryEngine::in_memory(&EngineConfig::default());

        let report = run(&engine, &script).unwrap();

        assert_eq!(report.warehouses.len(), 1);
        let main = &report.warehouses[0];
        assert!(main.audit.is_clean(), "{:?}", main.audit.violations);
        let codes: Vec<_> = main.valuation.rows.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, ["P1", "P2", "P3"]);
        assert_eq!(main.valuation.total_carats.to_string(), "12.500");
        assert_eq!(main.valuation.total_value.to_string(), "67500.00");

        let p3 = &main.valuation.rows[2];
        assert_eq!(p3.available_carats.to_string(), "4.000");
        assert_eq!(p3.total_value.to_string(), "25000.00");
        assert_eq!(engine.packet_by_code("P2").unwrap().attributes["shape"], "round");
    }

    #[test]
    fn failing_operation_is_reported_by_index() {
        let script: Script = serde_json::from_str(
            r#"{ "ops": [
                { "op": "create_warehouse", "name": "Main" },
                { "op": "split", "from": "NOPE", "to": "P9", "quantity": "1" }
            ] }"#,
        )
        .unwrap();
        let engine = InMemoryInventoryEngine::in_memory(&EngineConfig::default());

        let err = run(&engine, &script).unwrap_err();
        assert_eq!(err.to_string(), "operation #1 failed");
        assert!(matches!(
            err.root_cause().downcast_ref::<DomainError>(),
            Some(DomainError::NotFound(_))
        ));
    }
}
