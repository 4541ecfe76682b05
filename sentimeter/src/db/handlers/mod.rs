//! Repository implementations for database access.
//!
//! Each repository wraps a `PgConnection` (or a transaction deref'd to one) and exposes
//! strongly-typed operations for one group of tables:
//!
//! - [`Balances`]: host accounts and the balance transaction log
//! - [`Usage`]: raw usage events and additive usage rollups

pub mod balances;
pub mod usage;

pub use balances::Balances;
pub use usage::Usage;
