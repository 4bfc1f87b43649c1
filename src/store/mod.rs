//! # Computer Store
//!
//! Persistence boundary for computer identity records.
//!
//! The handshake never mutates a shared record. It reads an immutable
//! [`Computer`] snapshot, then sends an explicit [`ComputerChange`] back to
//! the store. Implementations are called from async tasks and must return
//! quickly; a database-backed store should keep its own connection pool.
//!
//! ## Components
//! - **ComputerStore**: the trait the server consumes
//! - **MemoryComputerStore**: thread-safe in-memory implementation

pub mod memory;

pub use memory::MemoryComputerStore;

use crate::error::Result;

/// Storage-assigned computer identifier.
pub type ComputerId = i64;

/// Storage-assigned group identifier.
pub type GroupId = i64;

/// Snapshot of one persisted computer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Computer {
    pub id: ComputerId,
    /// Stable identity. Never changes once assigned.
    pub public_key: String,
    /// Display name. Set on first sight only.
    pub name: String,
    pub app_version: String,
    pub os_version: String,
    /// Milliseconds since the Unix epoch.
    pub last_disconnect_ms: u64,
}

/// A computer seen for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComputer {
    pub public_key: String,
    pub name: String,
    pub app_version: String,
    pub os_version: String,
    pub last_disconnect_ms: u64,
}

/// Fields refreshed on every handshake of a known computer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputerUpdate {
    pub id: ComputerId,
    pub app_version: String,
    pub os_version: String,
}

/// What a successful handshake asks the store to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputerChange {
    Create(NewComputer),
    Update(ComputerUpdate),
}

/// Persistence operations the HostConnect server depends on.
pub trait ComputerStore: Send + Sync {
    fn find_by_public_key(&self, public_key: &str) -> Result<Option<Computer>>;

    /// Insert a new record and return it with its assigned ID.
    fn insert_computer(&self, computer: &NewComputer) -> Result<Computer>;

    fn update_computer(&self, update: &ComputerUpdate) -> Result<Computer>;

    fn update_last_disconnect(&self, id: ComputerId, at_ms: u64) -> Result<()>;

    /// Idempotent: adding an existing membership is not an error.
    fn add_group_membership(&self, id: ComputerId, group_id: GroupId) -> Result<()>;

    /// Apply a handshake's change and assert its group membership.
    ///
    /// Must be atomic: on error neither the record change nor the
    /// membership may remain visible to later calls.
    fn persist_computer(&self, change: &ComputerChange, group_id: GroupId) -> Result<Computer>;
}
