//! Read models.
//!
//! - `valuation` derives packet and warehouse valuations straight from
//!   committed layers at call time.
//! - `stock_journal` folds published movements into running balances and is
//!   idempotent under at-least-once delivery.

pub mod stock_journal;
pub mod valuation;

pub use stock_journal::{JournalBalance, StockJournalError, StockJournalProjection};
pub use valuation::{AuditReport, PacketValuation, ValuationReporter, WarehouseValuation};
