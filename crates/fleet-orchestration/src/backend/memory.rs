//! In-memory backend for the state store

use super::StateBackend;
use crate::{
    Result,
    state::{EventRecord, UnitRuntimeState},
};
use async_trait::async_trait;
use futures::lock::Mutex;
use std::collections::HashMap;

/// In-memory state backend
pub struct MemoryBackend {
    /// Unit states by id
    states: Mutex<HashMap<String, UnitRuntimeState>>,
    /// Event log
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        // No initialization needed for in-memory backend
        Ok(())
    }

    async fn put_state(&self, state: &UnitRuntimeState) -> Result<()> {
        let mut states = self.states.lock().await;
        states.insert(state.unit_id.clone(), state.clone());
        Ok(())
    }

    async fn load_states(&self) -> Result<Vec<UnitRuntimeState>> {
        let states = self.states.lock().await;
        Ok(states.values().cloned().collect())
    }

    async fn append_event(&self, mut event: EventRecord) -> Result<EventRecord> {
        let mut events = self.events.lock().await;
        event.sequence = events.len() as u64 + 1;
        events.push(event.clone());
        Ok(event)
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let events = self.events.lock().await;
        let start = events.len().saturating_sub(limit);
        Ok(events[start..].to_vec())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
