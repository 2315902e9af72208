use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gemledger_core::{Carats, DomainError, DomainResult, Entity, PacketId, WarehouseId};

/// Free-form classification (shape, color, clarity, stage, …).
///
/// Informational only: nothing in the ledger derives quantity or cost from it.
pub type PacketAttributes = BTreeMap<String, String>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketStatus {
    Available,
    /// Issued to a work order; cannot be split, merged, or allocated into.
    Assigned,
    /// Holds no stock. Retired but kept for traceability.
    Depleted,
}

/// What a caller supplies to create a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPacketSpec {
    pub code: String,
    #[serde(default)]
    pub attributes: PacketAttributes,
}

impl NewPacketSpec {
    pub fn raw(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            attributes: PacketAttributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Destination of stock produced by allocation or split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketTarget {
    Existing(PacketId),
    New(NewPacketSpec),
}

/// A named, traceable unit of material.
///
/// A packet stores no quantity: carats and value are always derived from its
/// FIFO layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub id: PacketId,
    pub code: String,
    pub attributes: PacketAttributes,
    pub status: PacketStatus,
    pub warehouse_id: WarehouseId,
    /// Work order the packet is issued to while `Assigned`.
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Packet {
    type Id = PacketId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Packet {
    pub fn create(
        id: PacketId,
        spec: &NewPacketSpec,
        warehouse_id: WarehouseId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let code = spec.code.trim();
        if code.is_empty() {
            return Err(DomainError::validation("packet code cannot be empty"));
        }
        if spec.attributes.keys().any(|k| k.trim().is_empty()) {
            return Err(DomainError::validation("packet attribute names cannot be empty"));
        }
        Ok(Self {
            id,
            code: code.to_string(),
            attributes: spec.attributes.clone(),
            status: PacketStatus::Available,
            warehouse_id,
            assigned_to: None,
            created_at,
        })
    }

    /// Raw packets carry no classification: material not yet assorted.
    pub fn is_raw(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Stock may only be moved out of or into packets that are not on a work
    /// order.
    pub fn ensure_movable(&self) -> DomainResult<()> {
        if self.status == PacketStatus::Assigned {
            return Err(DomainError::validation(format!(
                "packet {} is assigned to a work order",
                self.code
            )));
        }
        Ok(())
    }

    pub fn ensure_in(&self, warehouse_id: WarehouseId) -> DomainResult<()> {
        if self.warehouse_id != warehouse_id {
            return Err(DomainError::validation(format!(
                "packet {} is held in warehouse {}, not {warehouse_id}",
                self.code, self.warehouse_id
            )));
        }
        Ok(())
    }

    /// Issue to a work order.
    pub fn assign(&mut self, work_order: &str, available: Carats) -> DomainResult<()> {
        if work_order.trim().is_empty() {
            return Err(DomainError::validation("work order reference cannot be empty"));
        }
        match self.status {
            PacketStatus::Available if available.is_positive() => {
                self.status = PacketStatus::Assigned;
                self.assigned_to = Some(work_order.trim().to_string());
                Ok(())
            }
            PacketStatus::Available | PacketStatus::Depleted => Err(DomainError::validation(
                format!("packet {} holds no stock to assign", self.code),
            )),
            PacketStatus::Assigned => Err(DomainError::validation(format!(
                "packet {} is already assigned",
                self.code
            ))),
        }
    }

    /// Return from a work order. Returns the work order it was assigned to.
    pub fn release(&mut self, work_order: &str, available: Carats) -> DomainResult<String> {
        if self.status != PacketStatus::Assigned {
            return Err(DomainError::validation(format!(
                "packet {} is not assigned",
                self.code
            )));
        }
        let assigned_to = self.assigned_to.clone().unwrap_or_default();
        if assigned_to != work_order.trim() {
            return Err(DomainError::validation(format!(
                "packet {} is assigned to {assigned_to}, not {work_order}",
                self.code
            )));
        }
        self.assigned_to = None;
        self.status = if available.is_positive() {
            PacketStatus::Available
        } else {
            PacketStatus::Depleted
        };
        Ok(assigned_to)
    }

    /// Bring `status` in line with the stock the packet now holds. Returns
    /// `true` when this call retired the packet.
    pub fn sync_with_stock(&mut self, available: Carats) -> bool {
        match self.status {
            PacketStatus::Available if available.is_zero() => {
                self.status = PacketStatus::Depleted;
                true
            }
            PacketStatus::Depleted if available.is_positive() => {
                self.status = PacketStatus::Available;
                false
            }
            _ => false,
        }
    }
}
