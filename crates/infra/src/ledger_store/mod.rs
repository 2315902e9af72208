//! Ledger store boundary.
//!
//! Durable keyed storage for warehouses, source documents, packets, FIFO
//! layers and stock movements. The store only ever exposes committed state;
//! staged changes live in a [`crate::unit_of_work::UnitOfWork`] until they are
//! handed over as one [`ChangeSet`].

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{
    ChangeSet, LedgerKey, LedgerStore, MaterialKey, PacketSnapshot, StoreError, WarehouseSnapshot,
};
