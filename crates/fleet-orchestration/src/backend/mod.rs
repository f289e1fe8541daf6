//! State store backend implementations

pub mod memory;
pub mod sled;

use crate::{
    Result,
    state::{EventRecord, UnitRuntimeState},
};
use async_trait::async_trait;

/// Trait for state store persistence backends
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Initialize the backend
    async fn init(&self) -> Result<()>;

    /// Store the state of one unit
    async fn put_state(&self, state: &UnitRuntimeState) -> Result<()>;

    /// Load every stored unit state
    async fn load_states(&self) -> Result<Vec<UnitRuntimeState>>;

    /// Append an event, assigning its sequence number
    async fn append_event(&self, event: EventRecord) -> Result<EventRecord>;

    /// The most recent `limit` events, oldest first
    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>>;

    /// Flush pending writes
    async fn flush(&self) -> Result<()>;
}
