//! Scripted collaborators for orchestration and recovery tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_orchestration::{
    EngineSettings, Error, HealthCheck, HealthProbe, HealthResult, OrchestrationContext,
    ProbeFailure, RecoveryPolicy, Result, RuntimeAdapter, ShutdownTrigger, StateStore,
    UnitRegistry, UnitSpec,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One adapter call
#[derive(Debug, Clone)]
pub struct Call {
    pub unit: String,
    pub action: &'static str,
    pub at: DateTime<Utc>,
}

/// How the fake infrastructure reacts to a unit's adapter calls
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub start_fails: bool,
    pub start_heals: bool,
    pub restart_heals: bool,
    pub recreate_heals: bool,
    pub stop_fails: bool,
    pub ignores_graceful_stop: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            start_fails: false,
            start_heals: true,
            restart_heals: true,
            recreate_heals: true,
            stop_fails: false,
            ignores_graceful_stop: false,
        }
    }
}

#[derive(Default)]
struct Inner {
    healthy: HashSet<String>,
    running: HashSet<String>,
    behaviour: HashMap<String, Behaviour>,
    /// unit -> dependency whose recovery heals the unit as well
    heals_with: HashMap<String, String>,
    calls: Vec<Call>,
    probes: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Shared fake infrastructure driven by the adapter and read by the probe
#[derive(Default)]
pub struct FakeFleet {
    inner: Mutex<Inner>,
    action_delay: Mutex<Duration>,
    trigger_on_start: Mutex<Option<ShutdownTrigger>>,
}

impl FakeFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behaviour(&self, unit: &str, behaviour: Behaviour) {
        self.inner
            .lock()
            .unwrap()
            .behaviour
            .insert(unit.to_string(), behaviour);
    }

    pub fn behaviour(&self, unit: &str) -> Behaviour {
        self.inner
            .lock()
            .unwrap()
            .behaviour
            .get(unit)
            .cloned()
            .unwrap_or_default()
    }

    /// Make `unit` healthy whenever `dependency` becomes healthy
    pub fn heals_with(&self, unit: &str, dependency: &str) {
        self.inner
            .lock()
            .unwrap()
            .heals_with
            .insert(unit.to_string(), dependency.to_string());
    }

    pub fn set_healthy(&self, unit: &str, healthy: bool) {
        let mut inner = self.inner.lock().unwrap();
        if healthy {
            inner.healthy.insert(unit.to_string());
            inner.running.insert(unit.to_string());
            let linked: Vec<String> = inner
                .heals_with
                .iter()
                .filter(|(_, dep)| dep.as_str() == unit)
                .map(|(dependent, _)| dependent.clone())
                .collect();
            inner.healthy.extend(linked);
        } else {
            inner.healthy.remove(unit);
        }
    }

    pub fn set_running(&self, unit: &str, running: bool) {
        let mut inner = self.inner.lock().unwrap();
        if running {
            inner.running.insert(unit.to_string());
        } else {
            inner.running.remove(unit);
            inner.healthy.remove(unit);
        }
    }

    pub fn is_healthy(&self, unit: &str) -> bool {
        self.inner.lock().unwrap().healthy.contains(unit)
    }

    /// Delay every adapter action
    pub fn set_action_delay(&self, delay: Duration) {
        *self.action_delay.lock().unwrap() = delay;
    }

    /// Fire `trigger` on the first start call
    pub fn trigger_on_start(&self, trigger: ShutdownTrigger) {
        *self.trigger_on_start.lock().unwrap() = Some(trigger);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Calls of one kind, in order, as unit ids
    pub fn calls_of(&self, action: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.action == action)
            .map(|call| call.unit)
            .collect()
    }

    pub fn calls_for(&self, unit: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|call| call.unit == unit)
            .map(|call| call.action)
            .collect()
    }

    pub fn first_call(&self, unit: &str, action: &str) -> Option<Call> {
        self.calls()
            .into_iter()
            .find(|call| call.unit == unit && call.action == action)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }

    pub fn probe_count(&self, unit: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .probes
            .iter()
            .filter(|probed| probed.as_str() == unit)
            .count()
    }

    fn record(&self, unit: &str, action: &'static str) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call {
            unit: unit.to_string(),
            action,
            at: Utc::now(),
        });
        inner.in_flight += 1;
        inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
    }

    fn done(&self) {
        self.inner.lock().unwrap().in_flight -= 1;
    }

    async fn delay(&self) {
        let delay = *self.action_delay.lock().unwrap();
        if !delay.is_zero() {
            smol::Timer::after(delay).await;
        }
    }
}

/// Runtime adapter acting on a [`FakeFleet`]
pub struct FakeAdapter(pub Arc<FakeFleet>);

#[async_trait]
impl RuntimeAdapter for FakeAdapter {
    async fn start(&self, unit_id: &str) -> Result<()> {
        let fleet = &self.0;
        fleet.record(unit_id, "start");
        if let Some(trigger) = fleet.trigger_on_start.lock().unwrap().take() {
            trigger.trigger();
        }
        fleet.delay().await;
        fleet.done();

        let behaviour = fleet.behaviour(unit_id);
        if behaviour.start_fails {
            return Err(Error::adapter(unit_id, "scripted start failure"));
        }
        fleet.set_running(unit_id, true);
        if behaviour.start_heals {
            fleet.set_healthy(unit_id, true);
        }
        Ok(())
    }

    async fn stop(&self, unit_id: &str, graceful: bool, _timeout: Duration) -> Result<()> {
        let fleet = &self.0;
        fleet.record(unit_id, if graceful { "stop" } else { "kill" });
        fleet.delay().await;
        fleet.done();

        let behaviour = fleet.behaviour(unit_id);
        if behaviour.stop_fails {
            return Err(Error::adapter(unit_id, "scripted stop failure"));
        }
        if !(graceful && behaviour.ignores_graceful_stop) {
            fleet.set_running(unit_id, false);
        }
        Ok(())
    }

    async fn restart(&self, unit_id: &str) -> Result<()> {
        let fleet = &self.0;
        fleet.record(unit_id, "restart");
        fleet.delay().await;
        fleet.done();

        if fleet.behaviour(unit_id).restart_heals {
            fleet.set_healthy(unit_id, true);
        }
        Ok(())
    }

    async fn recreate(&self, unit_id: &str) -> Result<()> {
        let fleet = &self.0;
        fleet.record(unit_id, "recreate");
        fleet.delay().await;
        fleet.done();

        if fleet.behaviour(unit_id).recreate_heals {
            fleet.set_healthy(unit_id, true);
        }
        Ok(())
    }

    async fn is_running(&self, unit_id: &str) -> Result<bool> {
        Ok(self.0.inner.lock().unwrap().running.contains(unit_id))
    }
}

/// Health probe reading a [`FakeFleet`]
pub struct ScriptedProbe(pub Arc<FakeFleet>);

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, unit: &UnitSpec) -> HealthResult {
        let mut inner = self.0.inner.lock().unwrap();
        inner.probes.push(unit.id.clone());
        if inner.healthy.contains(&unit.id) {
            HealthResult::healthy(Duration::from_millis(1))
        } else {
            HealthResult::unhealthy(
                Duration::from_millis(1),
                ProbeFailure::Transport {
                    message: "connection refused".to_string(),
                },
            )
        }
    }
}

/// Unit with short timeouts suitable for tests
pub fn unit(id: &str, tier: u32, deps: &[&str]) -> UnitSpec {
    deps.iter().fold(
        UnitSpec::new(id, tier, HealthCheck::connectivity("localhost", 1))
            .with_startup_timeout(Duration::from_millis(100)),
        |unit, dep| unit.with_dependency(*dep),
    )
}

/// Unit with a specific recovery policy
pub fn unit_with_policy(id: &str, tier: u32, deps: &[&str], backoff: Duration, max_attempts: u32) -> UnitSpec {
    unit(id, tier, deps).with_recovery(RecoveryPolicy {
        backoff,
        max_attempts,
    })
}

/// Engine settings with fast polling
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        probe_interval: Duration::from_millis(10),
        recovery_interval: Duration::from_millis(20),
        ..EngineSettings::default()
    }
}

/// Context wiring the fake fleet into an in-memory store
pub fn context(registry: UnitRegistry, fleet: &Arc<FakeFleet>) -> OrchestrationContext {
    OrchestrationContext::new(
        registry,
        Arc::new(StateStore::in_memory()),
        Arc::new(ScriptedProbe(fleet.clone())),
        Arc::new(FakeAdapter(fleet.clone())),
    )
    .with_settings(fast_settings())
}
