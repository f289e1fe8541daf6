//! The runtime adapter seam.
//!
//! How a unit is physically started or stopped is outside the engine: the
//! orchestrator and the recovery manager only ever talk to a
//! [`RuntimeAdapter`].

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for the collaborator that acts on units on real infrastructure
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Start the unit
    async fn start(&self, unit_id: &str) -> Result<()>;

    /// Stop the unit
    ///
    /// A graceful stop asks the unit to shut down within `timeout`; a hard
    /// stop kills it.
    async fn stop(&self, unit_id: &str, graceful: bool, timeout: Duration) -> Result<()>;

    /// Restart the unit in place
    async fn restart(&self, unit_id: &str) -> Result<()>;

    /// Throw the unit away and create it again
    async fn recreate(&self, unit_id: &str) -> Result<()>;

    /// Whether the unit is currently running
    async fn is_running(&self, unit_id: &str) -> Result<bool>;
}
