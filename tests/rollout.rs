// ABOUTME: End-to-end rollout scenarios against the simulated cluster under paused tokio time.
// ABOUTME: Covers convergence, stall and rollback, conflicts, rejection, retries and cancellation.

use ferry::cluster::SimulatedCluster;
use ferry::config::{RegistryConfig, RolloutSettings};
use ferry::coordinator::{Coordinator, DeployRequest, ImageSource};
use ferry::error::Error;
use ferry::resolver::ImageResolver;
use ferry::rollout::{
    AttemptPhase, Outcome, RolloutError, RolloutStep, RolloutStrategy, StepOutcome, Workload,
};
use ferry::store::MemoryAuditLog;
use ferry::types::{ImageRef, Namespace, WorkloadKey, WorkloadName};
use std::sync::Arc;
use std::time::Duration;

fn key(name: &str) -> WorkloadKey {
    WorkloadKey::new(Namespace::default(), WorkloadName::new(name).unwrap())
}

fn image(reference: &str) -> ImageRef {
    ImageRef::parse(reference).unwrap()
}

fn workload(name: &str, desired: u32, surge: u32, unavailable: u32) -> Workload {
    let strategy = RolloutStrategy::new(surge, unavailable, Duration::from_secs(300)).unwrap();
    Workload::new(key(name), desired, "app", strategy).unwrap()
}

fn settings() -> RolloutSettings {
    RolloutSettings {
        poll_interval: Duration::from_secs(5),
        stall_after_polls: 6,
        ..RolloutSettings::default()
    }
}

fn coordinator(sim: &SimulatedCluster) -> Coordinator<SimulatedCluster, SimulatedCluster> {
    let registry = RegistryConfig::new(image("registry.local/web"));
    Coordinator::new(
        sim.clone(),
        ImageResolver::new(sim.clone(), registry),
        settings(),
    )
}

fn to_image(workload: &Workload, reference: &str) -> DeployRequest {
    DeployRequest::new(workload.clone(), ImageSource::Image(image(reference)))
}

fn all_on(sim: &SimulatedCluster, key: &WorkloadKey, reference: &str) -> bool {
    let target = image(reference);
    sim.replicas(key)
        .iter()
        .all(|(image, ready)| *ready && image.same_image(&target))
}

mod convergence {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn surge_one_unavailable_one_rolls_a_to_b() {
        let sim = SimulatedCluster::new();
        sim.set_readiness_delay(Duration::from_secs(10));
        let web = workload("web", 4, 1, 1);
        sim.add_workload(&web.key, &image("web:a"), 4);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
        assert_eq!(sim.replicas(&web.key).len(), 4);
        assert!(all_on(&sim, &web.key, "web:b"));

        // Surge one, wait for it, retire one old replica, repeat.
        let mutations = sim.mutations();
        assert_eq!(mutations.len(), 8);
        for (i, step) in mutations.iter().enumerate() {
            assert_eq!(step.count(), 1);
            assert_eq!(step.is_scale_up(), i % 2 == 0, "step {}: {}", i, step);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn already_converged_succeeds_without_steps() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 3, 1, 0);
        sim.add_workload(&web.key, &image("web:b"), 3);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Succeeded);
        assert!(attempt.steps().is_empty());
        assert_eq!(attempt.transitions().len(), 1);
        assert_eq!(attempt.transitions()[0].from, AttemptPhase::Pending);
        assert!(sim.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_mutation_in_flight() {
        let sim = SimulatedCluster::new();
        sim.set_readiness_delay(Duration::from_secs(3));
        sim.set_apply_latency(Duration::from_secs(2));
        let web = workload("web", 5, 2, 1);
        sim.add_workload(&web.key, &image("web:a"), 5);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
        assert_eq!(sim.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_observation_failures_do_not_fail_the_attempt() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 2);
        sim.fail_next_observations(3);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
        assert!(all_on(&sim, &web.key, "web:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn build_is_resolved_and_pinned() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("registry.local/web:old"), 2);
        sim.push_image(&image("registry.local/web:abc123"), "sha256:9d3e7f");

        let request = DeployRequest::new(
            web.clone(),
            ImageSource::Build(ferry::types::BuildId::new("abc123").unwrap()),
        );
        let report = coordinator(&sim).deploy(request).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Succeeded);
        assert_eq!(
            attempt.target().to_string(),
            "registry.local/web:abc123@sha256:9d3e7f"
        );
        assert_eq!(attempt.build().map(|b| b.as_str()), Some("abc123"));
        assert_eq!(attempt.previous(), Some(&image("registry.local/web:old")));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_workloads_run_concurrently() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        let api = workload("api", 3, 1, 1);
        sim.add_workload(&web.key, &image("web:a"), 2);
        sim.add_workload(&api.key, &image("api:a"), 3);

        let results = coordinator(&sim)
            .deploy_all(vec![to_image(&web, "web:b"), to_image(&api, "api:b")])
            .await;

        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.unwrap().outcome.phase(), AttemptPhase::Succeeded);
        }
        assert!(all_on(&sim, &web.key, "web:b"));
        assert!(all_on(&sim, &api.key, "api:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn workload_without_replicas_is_scaled_up_from_nothing() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 0);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
        assert!(report.outcome.attempt().previous().is_none());
        assert_eq!(sim.replicas(&web.key).len(), 2);
        assert!(all_on(&sim, &web.key, "web:b"));
        assert!(sim.mutations().iter().all(|step| step.is_scale_up()));
    }
}

mod rollback {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn never_ready_target_rolls_back_to_a() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 4, 1, 1);
        sim.add_workload(&web.key, &image("web:a"), 4);
        sim.never_ready(&image("web:b"));

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let Outcome::RolledBack { attempt, rollback } = &report.outcome else {
            panic!("expected rollback, got {:?}", report.outcome.phase());
        };
        assert_eq!(attempt.phase(), AttemptPhase::RolledBack);
        assert!(attempt.reason().unwrap().contains("no forward progress"));
        assert_eq!(attempt.rollback_attempt(), Some(rollback.id()));

        assert_eq!(rollback.phase(), AttemptPhase::Succeeded);
        assert_eq!(rollback.rollback_of(), Some(attempt.id()));
        assert_eq!(rollback.target(), &image("web:a"));

        let phases: Vec<AttemptPhase> = attempt.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            phases,
            vec![
                AttemptPhase::Progressing,
                AttemptPhase::Stalled,
                AttemptPhase::RollingBack,
                AttemptPhase::RolledBack,
            ]
        );

        assert_eq!(sim.replicas(&web.key).len(), 4);
        assert!(all_on(&sim, &web.key, "web:a"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_rollback_fails_both_records() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 2);
        // Neither image can become ready, so the rollback gets stuck too.
        sim.never_ready(&image("web:b"));
        sim.never_ready(&image("web:a"));
        let audit = Arc::new(MemoryAuditLog::new());

        let report = coordinator(&sim)
            .with_audit(audit.clone())
            .deploy(to_image(&web, "web:b"))
            .await
            .unwrap();

        let Outcome::Failed {
            attempt,
            rollback: Some(rollback),
        } = &report.outcome
        else {
            panic!("expected failed rollback, got {:?}", report.outcome.phase());
        };
        assert_eq!(attempt.phase(), AttemptPhase::Failed);
        assert!(attempt.reason().unwrap().contains("rollback stalled"));
        assert_eq!(attempt.rollback_attempt(), Some(rollback.id()));
        assert_eq!(rollback.phase(), AttemptPhase::Failed);
        assert_eq!(rollback.target(), &image("web:a"));

        let audited = audit.records();
        assert_eq!(audited.len(), 2);
        assert_eq!(audited[0].id(), attempt.id());
        assert_eq!(audited[1].id(), rollback.id());
        assert!(audited.iter().all(|r| r.phase() == AttemptPhase::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_disabled_fails_on_stall() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 2);
        sim.never_ready(&image("web:b"));

        let mut request = to_image(&web, "web:b");
        request.rollback = Some(false);
        let report = coordinator(&sim).deploy(request).await.unwrap();

        assert!(report.outcome.is_failed());
        assert!(report.outcome.rollback().is_none());
        assert!(
            report
                .outcome
                .attempt()
                .reason()
                .unwrap()
                .contains("rollback disabled")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_previous_image_fails_with_distinct_reason() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 0);
        sim.never_ready(&image("web:b"));

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Failed);
        assert!(attempt.previous().is_none());
        assert!(attempt.reason().unwrap().contains("no previous image"));
        assert!(report.outcome.rollback().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_behaves_like_a_stall() {
        let sim = SimulatedCluster::new();
        sim.set_readiness_delay(Duration::from_secs(60));
        let web = workload("web", 3, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 3);
        let coordinator = coordinator(&sim);

        let (report, cancelled) = tokio::join!(coordinator.deploy(to_image(&web, "web:b")), async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            coordinator.cancel(&web.key)
        });

        let report = report.unwrap();
        assert_eq!(&cancelled.unwrap(), report.outcome.attempt().id());
        assert_eq!(report.outcome.phase(), AttemptPhase::RolledBack);
        assert!(
            report
                .outcome
                .attempt()
                .reason()
                .unwrap()
                .contains("cancelled by operator")
        );
        assert!(sim.replicas(&web.key).iter().all(|(i, _)| i.same_image(&image("web:a"))));
    }
}

mod failures {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejected_step_fails_immediately() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 2);
        sim.reject_mutations(true);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Failed);
        assert!(report.outcome.rollback().is_none());
        assert_eq!(attempt.steps().len(), 1);
        assert!(matches!(
            attempt.steps()[0].outcome,
            StepOutcome::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_step_is_retried_with_backoff() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 1, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 1);
        sim.hang_next_applies(2);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Succeeded);

        let first: Vec<_> = attempt.steps().iter().filter(|s| s.sequence == 1).collect();
        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|s| s.try_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(matches!(first[0].outcome, StepOutcome::TimedOut { .. }));
        assert!(matches!(first[1].outcome, StepOutcome::TimedOut { .. }));
        assert_eq!(first[2].outcome, StepOutcome::Accepted);
        assert_eq!(sim.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_attempt() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 1, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 1);
        sim.hang_next_applies(10);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        let attempt = report.outcome.attempt();
        assert_eq!(attempt.phase(), AttemptPhase::Failed);
        assert_eq!(attempt.steps().len(), 4);
        assert!(attempt.reason().unwrap().contains("gave up after 4 tries"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_workload_fails() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);

        let report = coordinator(&sim).deploy(to_image(&web, "web:b")).await.unwrap();

        assert!(report.outcome.is_failed());
        assert!(sim.mutations().is_empty());
    }
}

mod conflicts {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_request_while_progressing_is_rejected() {
        let sim = SimulatedCluster::new();
        sim.set_readiness_delay(Duration::from_secs(10));
        let web = workload("web", 3, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 3);
        let coordinator = coordinator(&sim);

        let (first, second) = tokio::join!(coordinator.deploy(to_image(&web, "web:b")), async {
            tokio::time::sleep(Duration::from_secs(7)).await;
            coordinator.deploy(to_image(&web, "web:c")).await
        });

        match second {
            Err(Error::Rollout(RolloutError::Conflict { workload, .. })) => {
                assert_eq!(workload, web.key)
            }
            other => panic!("expected conflict, got {:?}", other.map(|r| r.outcome.phase())),
        }

        let first = first.unwrap();
        assert_eq!(first.outcome.phase(), AttemptPhase::Succeeded);
        let steps = first.outcome.attempt().steps();
        assert_eq!(steps.len(), sim.mutations().len());
        assert!(steps.iter().all(|s| match &s.step {
            RolloutStep::ScaleUp { image: i, .. } => i.same_image(&image("web:b")),
            RolloutStep::RetireOutdated { keep, .. } => keep.same_image(&image("web:b")),
            RolloutStep::TrimUpdated { image: i, .. } => i.same_image(&image("web:b")),
        }));
        assert!(all_on(&sim, &web.key, "web:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn workload_is_free_again_after_finishing() {
        let sim = SimulatedCluster::new();
        let web = workload("web", 2, 1, 0);
        sim.add_workload(&web.key, &image("web:a"), 2);
        let coordinator = coordinator(&sim);

        coordinator.deploy(to_image(&web, "web:b")).await.unwrap();
        let report = coordinator.deploy(to_image(&web, "web:c")).await.unwrap();

        assert_eq!(report.outcome.phase(), AttemptPhase::Succeeded);
        assert_eq!(report.outcome.attempt().previous(), Some(&image("web:b")));
    }
}
