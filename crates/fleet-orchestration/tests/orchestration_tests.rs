//! Integration tests for tier-driven start and stop

mod common;

use common::{Behaviour, FakeFleet, context, unit};
use fleet_orchestration::{
    Error, LifecycleOrchestrator, RunOutcome, ShutdownSignal, UnitRegistry, UnitStatus,
    shutdown_channel,
};
use std::time::Duration;

fn abc_registry() -> UnitRegistry {
    UnitRegistry::from_units([unit("a", 1, &[]), unit("b", 2, &["a"]), unit("c", 2, &["a"])])
}

#[smol_potat::test]
async fn test_sequential_start_waits_for_dependency() {
    let fleet = FakeFleet::new();
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));

    let summary = orchestrator
        .start_all(false, 5, &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Success);
    assert_eq!(summary.succeeded, vec!["a", "b", "c"]);
    // lexicographic within a tier
    assert_eq!(fleet.calls_of("start"), vec!["a", "b", "c"]);

    let store = &orchestrator.context().store;
    let a_healthy_at = store.get("a").await.last_transition_at;
    for dependent in ["b", "c"] {
        let started_at = fleet.first_call(dependent, "start").unwrap().at;
        assert!(
            started_at >= a_healthy_at,
            "{} started before a was healthy",
            dependent
        );
        assert_eq!(store.status(dependent).await, UnitStatus::Healthy);
    }
}

#[smol_potat::test]
async fn test_parallel_start_respects_concurrency_bound() {
    let fleet = FakeFleet::new();
    fleet.set_action_delay(Duration::from_millis(30));
    let registry = UnitRegistry::from_units([
        unit("w1", 1, &[]),
        unit("w2", 1, &[]),
        unit("w3", 1, &[]),
        unit("w4", 1, &[]),
        unit("w5", 1, &[]),
    ]);
    let orchestrator = LifecycleOrchestrator::new(context(registry, &fleet));

    let summary = orchestrator
        .start_all(true, 2, &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(summary.succeeded.len(), 5);
    assert!(fleet.max_in_flight() <= 2);
    assert!(fleet.max_in_flight() >= 1);
}

#[smol_potat::test]
async fn test_tier_is_a_barrier_in_parallel_mode() {
    let fleet = FakeFleet::new();
    fleet.set_action_delay(Duration::from_millis(20));
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));

    orchestrator
        .start_all(true, 5, &ShutdownSignal::never())
        .await
        .unwrap();

    let a_start = fleet.first_call("a", "start").unwrap().at;
    let a_healthy_at = orchestrator.context().store.get("a").await.last_transition_at;
    assert!(a_healthy_at >= a_start);
    for dependent in ["b", "c"] {
        assert!(fleet.first_call(dependent, "start").unwrap().at >= a_healthy_at);
    }
}

#[smol_potat::test]
async fn test_partial_failure_is_isolated() {
    let fleet = FakeFleet::new();
    fleet.set_behaviour(
        "api",
        Behaviour {
            start_fails: true,
            ..Behaviour::default()
        },
    );
    let registry = UnitRegistry::from_units([
        unit("db", 1, &[]),
        unit("api", 2, &["db"]),
        unit("web", 2, &["db"]),
        unit("worker", 3, &["api"]),
    ]);
    let orchestrator = LifecycleOrchestrator::new(context(registry, &fleet));

    let summary = orchestrator
        .start_all(true, 5, &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::PartialFailure);
    assert_eq!(summary.succeeded, vec!["db", "web"]);
    assert!(summary.has_failed("api"));
    assert!(summary.has_failed("worker"));

    let store = &orchestrator.context().store;
    assert_eq!(store.status("db").await, UnitStatus::Healthy);
    assert_eq!(store.status("web").await, UnitStatus::Healthy);
    assert_eq!(store.status("api").await, UnitStatus::StartFailed);

    let worker = store.get("worker").await;
    assert_eq!(worker.status, UnitStatus::StartFailed);
    assert!(worker.last_error.unwrap().contains("api"));
    // the dependency gate never reaches the adapter
    assert!(fleet.calls_for("worker").is_empty());
}

#[smol_potat::test]
async fn test_unit_that_never_turns_healthy_fails_to_start() {
    let fleet = FakeFleet::new();
    fleet.set_behaviour(
        "db",
        Behaviour {
            start_heals: false,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        LifecycleOrchestrator::new(context(UnitRegistry::from_units([unit("db", 1, &[])]), &fleet));

    let summary = orchestrator
        .start_all(true, 5, &ShutdownSignal::never())
        .await
        .unwrap();

    assert!(summary.has_failed("db"));
    assert!(fleet.probe_count("db") > 1);
    let state = orchestrator.context().store.get("db").await;
    assert_eq!(state.status, UnitStatus::StartFailed);
    assert!(state.last_error.unwrap().contains("not healthy"));
}

#[smol_potat::test]
async fn test_running_healthy_unit_is_not_started_again() {
    let fleet = FakeFleet::new();
    fleet.set_healthy("db", true);
    let orchestrator =
        LifecycleOrchestrator::new(context(UnitRegistry::from_units([unit("db", 1, &[])]), &fleet));

    let summary = orchestrator
        .start_all(false, 1, &ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Success);
    assert!(fleet.calls_of("start").is_empty());
    assert_eq!(
        orchestrator.context().store.status("db").await,
        UnitStatus::Healthy
    );
}

#[smol_potat::test]
async fn test_fatal_validation_blocks_every_operation() {
    let fleet = FakeFleet::new();
    let registry = UnitRegistry::from_units([unit("a", 1, &["b"]), unit("b", 1, &["a"])]);
    let orchestrator = LifecycleOrchestrator::new(context(registry, &fleet));
    let never = ShutdownSignal::never();

    assert!(matches!(
        orchestrator.start_all(true, 5, &never).await,
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        orchestrator.stop_all(false, Duration::from_secs(1), &never).await,
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        orchestrator.start_one("a").await,
        Err(Error::Configuration(_))
    ));
    assert!(fleet.calls().is_empty());
}

#[smol_potat::test]
async fn test_priority_inversion_only_blocks_in_strict_mode() {
    let fleet = FakeFleet::new();
    let registry = UnitRegistry::from_units([unit("api", 1, &[]), unit("db", 2, &[])]);
    let registry_with_inversion =
        UnitRegistry::from_units([unit("api", 1, &["db"]), unit("db", 2, &[])]);

    let orchestrator = LifecycleOrchestrator::new(context(registry, &fleet));
    assert!(orchestrator.start_one("api").await.is_ok());

    let lenient = LifecycleOrchestrator::new(context(registry_with_inversion.clone(), &fleet));
    assert!(lenient.start_one("db").await.is_ok());

    let mut strict_ctx = context(registry_with_inversion, &fleet);
    strict_ctx.settings.strict = true;
    let strict = LifecycleOrchestrator::new(strict_ctx);
    assert!(matches!(
        strict.start_one("db").await,
        Err(Error::Configuration(_))
    ));
}

#[smol_potat::test]
async fn test_start_one_applies_dependency_gate() {
    let fleet = FakeFleet::new();
    let registry = UnitRegistry::from_units([unit("db", 1, &[]), unit("api", 2, &["db"])]);
    let orchestrator = LifecycleOrchestrator::new(context(registry, &fleet));

    let summary = orchestrator.start_one("api").await.unwrap();
    assert!(summary.has_failed("api"));
    assert!(summary.failed[0].reason.contains("db"));

    orchestrator.start_one("db").await.unwrap();
    let summary = orchestrator.start_one("api").await.unwrap();
    assert_eq!(summary.outcome(), RunOutcome::Success);

    assert!(matches!(
        orchestrator.start_one("ghost").await,
        Err(Error::UnitNotFound(_))
    ));
}

#[smol_potat::test]
async fn test_stop_all_runs_tiers_descending() {
    let fleet = FakeFleet::new();
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));
    let never = ShutdownSignal::never();

    orchestrator.start_all(false, 1, &never).await.unwrap();
    let summary = orchestrator
        .stop_all(false, Duration::from_millis(100), &never)
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Success);
    let stops = fleet.calls_of("stop");
    assert_eq!(stops.last().map(String::as_str), Some("a"));
    for id in ["a", "b", "c"] {
        assert_eq!(
            orchestrator.context().store.status(id).await,
            UnitStatus::Stopped
        );
    }
}

#[smol_potat::test]
async fn test_graceful_stop_falls_back_to_hard_stop() {
    let fleet = FakeFleet::new();
    fleet.set_behaviour(
        "db",
        Behaviour {
            ignores_graceful_stop: true,
            ..Behaviour::default()
        },
    );
    fleet.set_healthy("db", true);
    let orchestrator =
        LifecycleOrchestrator::new(context(UnitRegistry::from_units([unit("db", 1, &[])]), &fleet));

    let summary = orchestrator
        .stop_one("db", false, Duration::from_millis(50))
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Success);
    assert_eq!(fleet.calls_for("db"), vec!["stop", "kill"]);
    assert_eq!(
        orchestrator.context().store.status("db").await,
        UnitStatus::Stopped
    );
}

#[smol_potat::test]
async fn test_forced_stop_skips_graceful_phase() {
    let fleet = FakeFleet::new();
    fleet.set_healthy("db", true);
    let orchestrator =
        LifecycleOrchestrator::new(context(UnitRegistry::from_units([unit("db", 1, &[])]), &fleet));

    orchestrator
        .stop_one("db", true, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(fleet.calls_for("db"), vec!["kill"]);
}

#[smol_potat::test]
async fn test_stop_failure_is_terminal_and_reported() {
    let fleet = FakeFleet::new();
    fleet.set_behaviour(
        "db",
        Behaviour {
            stop_fails: true,
            ..Behaviour::default()
        },
    );
    let orchestrator =
        LifecycleOrchestrator::new(context(UnitRegistry::from_units([unit("db", 1, &[])]), &fleet));

    let summary = orchestrator
        .stop_all(false, Duration::from_millis(50), &ShutdownSignal::never())
        .await
        .unwrap();

    assert!(summary.has_failed("db"));
    assert_eq!(
        orchestrator.context().store.status("db").await,
        UnitStatus::StopFailed
    );
}

#[smol_potat::test]
async fn test_stop_one_leaves_dependents_running() {
    let fleet = FakeFleet::new();
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));
    orchestrator
        .start_all(true, 5, &ShutdownSignal::never())
        .await
        .unwrap();

    orchestrator
        .stop_one("a", false, Duration::from_millis(50))
        .await
        .unwrap();

    let store = &orchestrator.context().store;
    assert_eq!(store.status("a").await, UnitStatus::Stopped);
    assert_eq!(store.status("b").await, UnitStatus::Healthy);
    assert_eq!(store.status("c").await, UnitStatus::Healthy);
}

#[smol_potat::test]
async fn test_cancellation_finishes_tier_and_skips_the_rest() {
    let fleet = FakeFleet::new();
    let (trigger, signal) = shutdown_channel();
    fleet.trigger_on_start(trigger);
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));

    let summary = orchestrator.start_all(true, 5, &signal).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.outcome(), RunOutcome::PartialFailure);
    assert_eq!(summary.succeeded, vec!["a"]);
    assert_eq!(summary.skipped, vec!["b", "c"]);
    assert_eq!(fleet.calls_of("start"), vec!["a"]);
}

#[smol_potat::test]
async fn test_restart_all_stops_then_starts() {
    let fleet = FakeFleet::new();
    let orchestrator = LifecycleOrchestrator::new(context(abc_registry(), &fleet));
    let never = ShutdownSignal::never();
    orchestrator.start_all(true, 5, &never).await.unwrap();

    let summary = orchestrator
        .restart_all(true, 5, false, Duration::from_millis(50), &never)
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Success);
    assert_eq!(summary.succeeded, vec!["a", "b", "c"]);
    assert_eq!(fleet.calls_for("a"), vec!["start", "stop", "start"]);
}
