//! `gemledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, and the fixed-precision quantity/currency
//! value objects every other crate computes with.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{MovementId, PacketId, ReferenceId, SourceDocumentId, SourceItemId, WarehouseId};
pub use value_object::{Carats, CURRENCY_SCALE, Money, QUANTITY_SCALE, ValueObject, sum_values};
