//! Inventory domain module: packets, source documents, FIFO cost layers and
//! stock movements.
//!
//! This crate contains business rules only, implemented purely as
//! deterministic domain logic (no IO, no locking, no storage). The `infra`
//! crate decides *when* these rules run and makes their effects atomic.

pub mod fifo;
pub mod layer;
pub mod movement;
pub mod packet;
pub mod source;
pub mod warehouse;

pub use fifo::{CostSource, LayerStack, lots_value};
pub use layer::{ConsumedLot, FifoLayer, LayerId, Provenance, ProvenanceKind};
pub use movement::{MaterialType, MovementType, StockMovement};
pub use packet::{NewPacketSpec, Packet, PacketAttributes, PacketStatus, PacketTarget};
pub use source::{SourceDocument, SourceDocumentItem};
pub use warehouse::Warehouse;
