// ABOUTME: Integration tests for checkpoints, locks, resume and audit delivery.
// ABOUTME: Interrupts rollouts mid-flight and continues them from the attempt store.

use ferry::cluster::SimulatedCluster;
use ferry::config::{RegistryConfig, RolloutSettings};
use ferry::coordinator::{Coordinator, DeployRequest, ImageSource};
use ferry::diagnostics::WarningKind;
use ferry::error::Error;
use ferry::resolver::ImageResolver;
use ferry::rollout::{AttemptPhase, RolloutError, RolloutStep, RolloutStrategy, Workload};
use ferry::store::{AttemptStore, LockInfo, MemoryAuditLog, REFRESH_EVERY};
use ferry::types::{ImageRef, Namespace, WorkloadKey, WorkloadName};
use std::sync::Arc;
use std::time::Duration;

fn image(reference: &str) -> ImageRef {
    ImageRef::parse(reference).unwrap()
}

fn workload(desired: u32) -> Workload {
    let key = WorkloadKey::new(Namespace::default(), WorkloadName::new("web").unwrap());
    let strategy = RolloutStrategy::new(1, 0, Duration::from_secs(300)).unwrap();
    Workload::new(key, desired, "app", strategy).unwrap()
}

fn coordinator(
    sim: &SimulatedCluster,
    state: &std::path::Path,
) -> Coordinator<SimulatedCluster, SimulatedCluster> {
    let registry = RegistryConfig::new(image("registry.local/web"));
    let settings = RolloutSettings {
        stall_after_polls: 6,
        ..RolloutSettings::default()
    };
    Coordinator::new(
        sim.clone(),
        ImageResolver::new(sim.clone(), registry),
        settings,
    )
    .with_store(AttemptStore::new(state))
}

fn request(web: &Workload, reference: &str) -> DeployRequest {
    DeployRequest::new(web.clone(), ImageSource::Image(image(reference)))
}

#[tokio::test(start_paused = true)]
async fn finished_attempt_is_audited_and_checkpoint_cleared() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);

    let report = coordinator(&sim, state.path())
        .deploy(request(&web, "web:b"))
        .await
        .unwrap();
    assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
    assert!(!report.diagnostics.has_warnings());

    let store = AttemptStore::new(state.path());
    assert!(store.load(&web.key).unwrap().is_none());
    let history = store.audit_log().read_all().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id(), report.outcome.attempt().id());
    assert!(!state.path().join("locks/default.web.lock").exists());
}

#[tokio::test(start_paused = true)]
async fn rolled_back_attempt_audits_both_records() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);
    sim.never_ready(&image("web:b"));

    let report = coordinator(&sim, state.path())
        .deploy(request(&web, "web:b"))
        .await
        .unwrap();
    assert_eq!(report.outcome.phase(), AttemptPhase::RolledBack);

    let history = AttemptStore::new(state.path())
        .audit_log()
        .read_all()
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].phase(), AttemptPhase::RolledBack);
    assert!(history[1].is_rollback());
    assert_eq!(history[1].rollback_of(), Some(history[0].id()));
}

#[tokio::test(start_paused = true)]
async fn interrupted_attempt_resumes_from_checkpoint() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_secs(10));
    let web = workload(3);
    sim.add_workload(&web.key, &image("web:a"), 3);

    // Drop the rollout mid-flight, as a crash would.
    let interrupted = tokio::time::timeout(
        Duration::from_secs(12),
        coordinator(&sim, state.path()).deploy(request(&web, "web:b")),
    )
    .await;
    assert!(interrupted.is_err());

    let store = AttemptStore::new(state.path());
    let checkpoint = store.load(&web.key).unwrap().unwrap();
    assert_eq!(checkpoint.attempt.phase(), AttemptPhase::Progressing);
    assert!(!checkpoint.attempt.steps().is_empty());

    // A fresh request must not silently abandon the unfinished attempt.
    let restarted = coordinator(&sim, state.path());
    let err = restarted.deploy(request(&web, "web:c")).await.unwrap_err();
    assert!(matches!(err, Error::Rollout(RolloutError::Conflict { .. })));

    let report = restarted.resume(&web.key, false).await.unwrap();
    assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
    assert_eq!(report.outcome.attempt().id(), checkpoint.attempt.id());
    assert!(
        report.outcome.attempt().steps().len() > checkpoint.attempt.steps().len(),
        "resumed attempt keeps its step log and extends it"
    );
    assert!(store.load(&web.key).unwrap().is_none());
    assert!(
        sim.replicas(&web.key)
            .iter()
            .all(|(i, ready)| *ready && i.same_image(&image("web:b")))
    );
}

#[tokio::test(start_paused = true)]
async fn resumed_attempt_keeps_its_rollback_policy() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);
    sim.never_ready(&image("web:b"));

    let mut no_rollback = request(&web, "web:b");
    no_rollback.rollback = Some(false);
    let interrupted = tokio::time::timeout(
        Duration::from_secs(12),
        coordinator(&sim, state.path()).deploy(no_rollback),
    )
    .await;
    assert!(interrupted.is_err());

    let store = AttemptStore::new(state.path());
    let checkpoint = store.load(&web.key).unwrap().unwrap();
    assert!(!checkpoint.allow_rollback);

    // The resuming coordinator's own default is to roll back.
    let report = coordinator(&sim, state.path())
        .resume(&web.key, false)
        .await
        .unwrap();
    assert_eq!(report.outcome.phase(), AttemptPhase::Failed);
    assert!(report.outcome.rollback().is_none());
    assert!(
        report
            .outcome
            .attempt()
            .reason()
            .unwrap_or_default()
            .contains("rollback disabled")
    );
    assert!(
        !sim.mutations().iter().any(|step| matches!(
            step,
            RolloutStep::ScaleUp { image: scaled, .. } if scaled.same_image(&image("web:a"))
        )),
        "the previous image is never scaled back up"
    );
}

#[tokio::test(start_paused = true)]
async fn force_discards_unfinished_attempt() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_secs(10));
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);

    let _ = tokio::time::timeout(
        Duration::from_secs(7),
        coordinator(&sim, state.path()).deploy(request(&web, "web:b")),
    )
    .await;

    let mut forced = request(&web, "web:c");
    forced.force = true;
    let report = coordinator(&sim, state.path())
        .deploy(forced)
        .await
        .unwrap();
    assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
    assert_eq!(report.outcome.attempt().target(), &image("web:c"));
}

#[tokio::test(start_paused = true)]
async fn lock_held_by_another_coordinator_conflicts() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_secs(10));
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);

    let first = coordinator(&sim, state.path());
    let second = coordinator(&sim, state.path());

    let (a, b) = tokio::join!(first.deploy(request(&web, "web:b")), async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        second.deploy(request(&web, "web:c")).await
    });

    assert_eq!(a.unwrap().outcome.phase(), AttemptPhase::Succeeded);
    match b {
        Err(Error::Rollout(RolloutError::Conflict { holder, .. })) => {
            assert!(holder.contains(&format!("pid {}", std::process::id())))
        }
        other => panic!("expected conflict, got {:?}", other.map(|r| r.outcome.phase())),
    }
}

#[tokio::test(start_paused = true)]
async fn long_rollout_keeps_its_lock_fresh() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_secs(12 * 60));
    let key = WorkloadKey::new(Namespace::default(), WorkloadName::new("web").unwrap());
    let strategy = RolloutStrategy::new(1, 0, Duration::from_secs(30 * 60)).unwrap();
    let web = Workload::new(key, 1, "app", strategy).unwrap();
    sim.add_workload(&web.key, &image("web:a"), 1);

    let patient = Coordinator::new(
        sim.clone(),
        ImageResolver::new(sim.clone(), RegistryConfig::new(image("registry.local/web"))),
        RolloutSettings {
            stall_after_polls: 500,
            ..RolloutSettings::default()
        },
    )
    .with_store(AttemptStore::new(state.path()));

    let lock_path = state.path().join("locks/default.web.lock");
    let (report, seen) = tokio::join!(patient.deploy(request(&web, "web:b")), async {
        tokio::time::sleep(REFRESH_EVERY + Duration::from_secs(60)).await;
        let raw = std::fs::read_to_string(&lock_path).unwrap();
        serde_json::from_str::<LockInfo>(&raw).unwrap()
    });

    assert_eq!(report.unwrap().outcome.phase(), AttemptPhase::Succeeded);
    assert!(seen.refreshed_at.is_some());
    assert_eq!(seen.pid, std::process::id());
    assert!(!lock_path.exists());
}

#[tokio::test(start_paused = true)]
async fn failed_audit_keeps_checkpoint_until_resume_delivers_it() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);

    let broken = Arc::new(MemoryAuditLog::new());
    broken.fail_next(100);
    let report = coordinator(&sim, state.path())
        .with_audit(broken.clone())
        .deploy(request(&web, "web:b"))
        .await
        .unwrap();

    assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
    assert_eq!(
        report
            .diagnostics
            .of_kind(WarningKind::AuditDelivery)
            .count(),
        1
    );
    assert!(broken.records().is_empty());

    let store = AttemptStore::new(state.path());
    let kept = store.load(&web.key).unwrap().unwrap();
    assert_eq!(kept.attempt.phase(), AttemptPhase::Succeeded);

    let redelivered = coordinator(&sim, state.path())
        .resume(&web.key, false)
        .await
        .unwrap();
    assert_eq!(redelivered.outcome.attempt().id(), kept.attempt.id());
    assert!(store.load(&web.key).unwrap().is_none());
    assert_eq!(store.audit_log().read_all().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_marker_stops_attempt_in_another_coordinator() {
    let state = tempfile::tempdir().unwrap();
    let sim = SimulatedCluster::new();
    sim.set_readiness_delay(Duration::from_secs(60));
    let web = workload(2);
    sim.add_workload(&web.key, &image("web:a"), 2);

    let running = coordinator(&sim, state.path());
    let operator = coordinator(&sim, state.path());

    let (report, cancelled) = tokio::join!(running.deploy(request(&web, "web:b")), async {
        tokio::time::sleep(Duration::from_secs(8)).await;
        operator.cancel(&web.key)
    });

    let report = report.unwrap();
    assert_eq!(&cancelled.unwrap(), report.outcome.attempt().id());
    assert_eq!(report.outcome.phase(), AttemptPhase::RolledBack);
    assert!(!AttemptStore::new(state.path()).cancel_requested(report.outcome.attempt().id()));
}
