//! Sled database backend for the state store

use super::StateBackend;
use crate::{
    Result,
    state::{EventRecord, UnitRuntimeState},
};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, error, info};

/// Sled-based state backend
pub struct SledBackend {
    /// Database instance
    db: ::sled::Db,
    /// Unit states keyed by unit id
    units: ::sled::Tree,
    /// Events keyed by big-endian sequence number
    events: ::sled::Tree,
}

impl SledBackend {
    /// Open (or create) a sled database at `path`
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure the directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening state database at {:?}", path);
        let db = ::sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary sled backend (for testing)
    pub async fn temporary() -> Result<Self> {
        info!("Creating temporary state database");
        let db = ::sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: ::sled::Db) -> Result<Self> {
        let units = db.open_tree("units")?;
        let events = db.open_tree("events")?;
        Ok(Self { db, units, events })
    }
}

#[async_trait]
impl StateBackend for SledBackend {
    async fn init(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn put_state(&self, state: &UnitRuntimeState) -> Result<()> {
        debug!("Storing state for unit: {}", state.unit_id);

        let value = serde_json::to_vec(state)?;
        self.units.insert(state.unit_id.as_bytes(), value)?;
        self.units.flush_async().await?;

        Ok(())
    }

    async fn load_states(&self) -> Result<Vec<UnitRuntimeState>> {
        let mut states = Vec::new();

        for result in self.units.iter() {
            let (_, value) = result?;
            let state: UnitRuntimeState = serde_json::from_slice(&value)?;
            states.push(state);
        }

        Ok(states)
    }

    async fn append_event(&self, mut event: EventRecord) -> Result<EventRecord> {
        // generate_id is monotonic across restarts; +1 keeps sequences non-zero
        event.sequence = self.db.generate_id()? + 1;

        let value = serde_json::to_vec(&event)?;
        self.events.insert(event.sequence.to_be_bytes(), value)?;
        self.events.flush_async().await?;

        Ok(event)
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let mut events = Vec::with_capacity(limit);

        for result in self.events.iter().rev().take(limit) {
            let (_, value) = result?;
            events.push(serde_json::from_slice::<EventRecord>(&value)?);
        }

        events.reverse();
        Ok(events)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        // Attempt to flush on drop
        if let Err(e) = self.db.flush() {
            error!("Failed to flush state database on drop: {}", e);
        }
    }
}
