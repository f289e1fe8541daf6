//! Request handlers shared by the monitor and one-shot invocations

use crate::protocol::{Request, Response};
use crate::runtime::Runtime;
use fleet_orchestration::{
    Error, LifecycleOrchestrator, OrchestrationContext, RecoveryManager, ShutdownSignal,
    report_snapshot,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Executes operator requests against one engine context
///
/// The recovery manager is shared with the monitor's poll loop, so manual
/// recovery and automatic recovery use the same per-unit locks.
pub struct Host {
    context: OrchestrationContext,
    manager: Arc<RecoveryManager>,
    stop_timeout: Duration,
    shutdown: ShutdownSignal,
}

impl Host {
    /// Host over `runtime`; orchestrator runs are cancelled by `shutdown`
    pub fn new(runtime: &Runtime, shutdown: ShutdownSignal) -> Self {
        Self {
            context: runtime.context.clone(),
            manager: Arc::new(runtime.recovery_manager()),
            stop_timeout: runtime.config.stop_timeout(),
            shutdown,
        }
    }

    /// The recovery manager requests are served with
    pub fn recovery_manager(&self) -> &RecoveryManager {
        &self.manager
    }

    /// Handle one request
    ///
    /// Engine errors become [`Response::Error`]; a request that changed
    /// anything is followed by a store flush.
    pub async fn handle(&self, request: Request) -> Response {
        debug!("Handling request: {:?}", request);
        let mutating = request.is_mutating();

        let response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(Error::Configuration(report)) => {
                error!("Refusing to run with an invalid dependency graph");
                Response::InvalidGraph {
                    report: report.to_string(),
                }
            }
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        };

        if mutating {
            if let Err(e) = self.context.store.flush().await {
                error!("Failed to flush state store: {}", e);
            }
        }
        response
    }

    async fn dispatch(&self, request: Request) -> fleet_orchestration::Result<Response> {
        match request {
            Request::Start {
                sequential,
                max_concurrency,
            } => {
                let summary = self
                    .orchestrator()
                    .start_all(!sequential, self.concurrency(max_concurrency), &self.shutdown)
                    .await?;
                Ok(Response::Run { summary })
            }

            Request::Stop { force, timeout } => {
                let summary = self
                    .orchestrator()
                    .stop_all(force, self.stop_timeout(timeout), &self.shutdown)
                    .await?;
                Ok(Response::Run { summary })
            }

            Request::Restart {
                sequential,
                max_concurrency,
                force,
                timeout,
            } => {
                let summary = self
                    .orchestrator()
                    .restart_all(
                        !sequential,
                        self.concurrency(max_concurrency),
                        force,
                        self.stop_timeout(timeout),
                        &self.shutdown,
                    )
                    .await?;
                Ok(Response::Run { summary })
            }

            Request::StartUnit { id } => {
                let summary = self.orchestrator().start_one(&id).await?;
                Ok(Response::Run { summary })
            }

            Request::StopUnit { id, force, timeout } => {
                let summary = self
                    .orchestrator()
                    .stop_one(&id, force, self.stop_timeout(timeout))
                    .await?;
                Ok(Response::Run { summary })
            }

            Request::TriggerRecovery { id, reset } => {
                if reset {
                    self.manager.reset_failures(&id).await?;
                }
                let outcome = self.manager.trigger_recovery(&id).await?;
                Ok(Response::Recovery { id, reset, outcome })
            }

            Request::Poll => Ok(Response::Poll {
                report: self.manager.poll_once().await,
            }),

            Request::Status => Ok(Response::Status {
                snapshot: report_snapshot(&self.context.registry, &self.context.store).await,
            }),

            Request::Report { events } => {
                let snapshot = report_snapshot(&self.context.registry, &self.context.store).await;
                let events = self
                    .context
                    .store
                    .recent_events(events)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Could not read the event log: {}", e);
                        Vec::new()
                    });
                Ok(Response::Report { snapshot, events })
            }
        }
    }

    fn orchestrator(&self) -> LifecycleOrchestrator {
        LifecycleOrchestrator::new(self.context.clone())
    }

    fn concurrency(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.context.settings.max_concurrency)
    }

    fn stop_timeout(&self, requested: Option<u64>) -> Duration {
        requested
            .map(Duration::from_secs)
            .unwrap_or(self.stop_timeout)
    }
}
