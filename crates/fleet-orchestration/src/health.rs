//! Health probing for units.
//!
//! A probe is a single, bounded, side-effect free query: it never retries and
//! never touches runtime state. Retry policy belongs to the recovery manager
//! and the startup wait loop.

use crate::config::{HealthCheck, UnitSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol::Timer;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Why a probe failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ProbeFailure {
    /// No answer within the probe timeout
    Timeout,
    /// Connection or protocol error
    Transport {
        /// Error detail
        message: String,
    },
    /// Endpoint answered with the wrong status code
    UnexpectedStatus {
        /// Status the check expects
        expected: u16,
        /// Status that was returned
        actual: u16,
    },
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout => write!(f, "probe timed out"),
            ProbeFailure::Transport { message } => write!(f, "{}", message),
            ProbeFailure::UnexpectedStatus { expected, actual } => {
                write!(f, "expected status {}, got {}", expected, actual)
            }
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    /// Whether the unit passed
    pub ok: bool,
    /// Time the probe took
    pub latency_ms: u64,
    /// Failure detail when `ok` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
}

impl HealthResult {
    /// Passing result
    pub fn healthy(latency: Duration) -> Self {
        Self {
            ok: true,
            latency_ms: latency.as_millis() as u64,
            failure: None,
        }
    }

    /// Failing result
    pub fn unhealthy(latency: Duration, failure: ProbeFailure) -> Self {
        Self {
            ok: false,
            latency_ms: latency.as_millis() as u64,
            failure: Some(failure),
        }
    }

    /// Failure description, or "healthy"
    pub fn describe(&self) -> String {
        match &self.failure {
            Some(failure) => failure.to_string(),
            None if self.ok => "healthy".to_string(),
            None => "unhealthy".to_string(),
        }
    }
}

/// Trait for anything that can probe a unit's health
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run one health check against `unit`
    async fn probe(&self, unit: &UnitSpec) -> HealthResult;
}

/// Network health prober dispatching on the check kind
#[derive(Debug, Clone, Default)]
pub struct HealthProber;

impl HealthProber {
    /// Create a new prober
    pub fn new() -> Self {
        Self
    }

    async fn probe_connectivity(host: &str, port: u16, timeout: Duration) -> Option<ProbeFailure> {
        let connect = async {
            match async_net::TcpStream::connect((host, port)).await {
                Ok(_) => None,
                Err(e) => Some(ProbeFailure::Transport {
                    message: format!("connect to {}:{} failed: {}", host, port, e),
                }),
            }
        };

        smol::future::or(connect, async {
            Timer::after(timeout).await;
            Some(ProbeFailure::Timeout)
        })
        .await
    }

    async fn probe_endpoint(url: &str, expected: u16, timeout: Duration) -> Option<ProbeFailure> {
        let url = url.to_string();
        let request = smol::unblock(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()?;
            client.get(&url).send().map(|response| response.status().as_u16())
        });

        let outcome = smol::future::or(async { Some(request.await) }, async {
            Timer::after(timeout).await;
            None
        })
        .await;

        match outcome {
            None => Some(ProbeFailure::Timeout),
            Some(Ok(status)) if status == expected => None,
            Some(Ok(status)) => Some(ProbeFailure::UnexpectedStatus {
                expected,
                actual: status,
            }),
            Some(Err(e)) if e.is_timeout() => Some(ProbeFailure::Timeout),
            Some(Err(e)) => Some(ProbeFailure::Transport {
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl HealthProbe for HealthProber {
    async fn probe(&self, unit: &UnitSpec) -> HealthResult {
        let start = Instant::now();
        let timeout = unit.probe_timeout();

        let failure = match &unit.health_check {
            HealthCheck::Connectivity { host, port, .. } => {
                Self::probe_connectivity(host, *port, timeout).await
            }
            HealthCheck::Endpoint {
                url,
                expected_status,
                ..
            } => Self::probe_endpoint(url, *expected_status, timeout).await,
        };

        let latency = start.elapsed();
        match failure {
            None => {
                debug!("Health check for '{}' passed in {:?}", unit.id, latency);
                HealthResult::healthy(latency)
            }
            Some(failure) => {
                debug!(
                    "Health check for '{}' ({}) failed: {}",
                    unit.id,
                    unit.health_check.describe(),
                    failure
                );
                HealthResult::unhealthy(latency, failure)
            }
        }
    }
}

/// Poll `probe` until the unit passes or `timeout` elapses
///
/// Returns the last probe result. The first probe runs immediately; later
/// probes are spaced by `interval`, and the final wait is clipped to the
/// deadline.
pub async fn wait_until_healthy(
    probe: &dyn HealthProbe,
    unit: &UnitSpec,
    timeout: Duration,
    interval: Duration,
) -> HealthResult {
    let deadline = Instant::now() + timeout;

    loop {
        let result = probe.probe(unit).await;
        if result.ok {
            return result;
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "Unit '{}' not healthy after {:?}: {}",
                unit.id,
                timeout,
                result.describe()
            );
            return result;
        }

        Timer::after(interval.min(deadline - now)).await;
    }
}
