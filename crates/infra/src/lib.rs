//! Infrastructure layer: ledger storage, key locking, retries, configuration,
//! and the components that run inventory operations atomically on top of the
//! pure domain crates.

pub mod allocation;
pub mod config;
pub mod engine;
pub mod ledger_store;
pub mod lifecycle;
pub mod locks;
pub mod projections;
pub mod receiving;
pub mod retry;
pub mod unit_of_work;
pub mod warehouses;


pub use allocation::{
    AllocateRequest, AllocatedLine, AllocationCoordinator, AllocationLine, AllocationResult,
};
pub use config::EngineConfig;
pub use engine::{InMemoryInventoryEngine, InventoryEngine, MovementEnvelope};
pub use ledger_store::{InMemoryLedgerStore, LedgerKey, LedgerStore};
pub use lifecycle::{
    CustodyChange, MergeRequest, MergeResult, PacketLifecycleManager, SplitRequest, SplitResult,
};
pub use projections::{
    AuditReport, PacketValuation, StockJournalProjection, ValuationReporter, WarehouseValuation,
};
pub use receiving::{PostReceipt, ReceiptLine, ReceivingService};
pub use retry::RetryPolicy;
pub use unit_of_work::{Committed, LedgerAccess, UnitOfWork};
pub use warehouses::WarehouseRegistry;
