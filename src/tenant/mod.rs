//! Tenant isolation layer
//!
//! Each tenant gets an isolated SQLite database with its business records and
//! outbound message queue. The engine database never holds tenant data.

pub mod database;
pub mod outbox;
pub mod records;

pub use database::{validate_tenant_id, TenantDatabaseManager};
pub use outbox::{MessageOrigin, Outbox, OutboxMessage};
pub use records::{RecordQuery, RecordStore};
