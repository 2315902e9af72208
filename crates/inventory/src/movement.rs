use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use gemledger_core::{Carats, MovementId, PacketId, ReferenceId, SourceItemId, WarehouseId};
use gemledger_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialType {
    Packet,
    SourceItem,
}

impl MaterialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialType::Packet => "packet",
            MaterialType::SourceItem => "source_item",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Receive,
    Split,
    Merge,
    Assign,
    Return,
    Depleted,
}

/// Append-only audit record of a quantity or custody change.
///
/// Movements are derived facts. Current quantity always comes from layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub material_type: MaterialType,
    pub material_id: Uuid,
    pub movement_type: MovementType,
    /// Signed: positive into the material, negative out of it.
    pub quantity: Carats,
    pub warehouse_id: WarehouseId,
    pub reference: ReferenceId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonValue,
}

impl StockMovement {
    pub fn for_packet(
        packet_id: PacketId,
        warehouse_id: WarehouseId,
        movement_type: MovementType,
        quantity: Carats,
        reference: ReferenceId,
        created_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            id: MovementId::new(),
            material_type: MaterialType::Packet,
            material_id: *packet_id.as_uuid(),
            movement_type,
            quantity,
            warehouse_id,
            reference,
            created_at,
            metadata,
        }
    }

    pub fn for_source_item(
        item_id: SourceItemId,
        warehouse_id: WarehouseId,
        movement_type: MovementType,
        quantity: Carats,
        reference: ReferenceId,
        created_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            id: MovementId::new(),
            material_type: MaterialType::SourceItem,
            material_id: *item_id.as_uuid(),
            movement_type,
            quantity,
            warehouse_id,
            reference,
            created_at,
            metadata,
        }
    }

    pub fn concerns_packet(&self, packet_id: PacketId) -> bool {
        self.material_type == MaterialType::Packet && self.material_id == *packet_id.as_uuid()
    }
}

impl Event for StockMovement {
    fn event_type(&self) -> &'static str {
        match self.movement_type {
            MovementType::Receive => "inventory.stock.received",
            MovementType::Split => "inventory.stock.split",
            MovementType::Merge => "inventory.stock.merged",
            MovementType::Assign => "inventory.stock.assigned",
            MovementType::Return => "inventory.stock.returned",
            MovementType::Depleted => "inventory.stock.depleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
