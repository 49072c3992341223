//! Status bookkeeping of a LocustTest: conditions, phase transitions and timestamps.
//!
//! Everything here is a pure function over the status so the controller can run it inside
//! a read, mutate, write retry loop.
use k8s_openapi::{
    api::batch::v1::Job,
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::{DateTime, Utc},
};

use crate::locusttest::{
    health::{PodHealthStatus, REASON_PODS_STARTING},
    LocustTestStatus, Phase,
};

/// All resources are created.
pub const CONDITION_READY: &str = "Ready";
/// Workers are connected to the master.
pub const CONDITION_WORKERS_CONNECTED: &str = "WorkersConnected";
/// The test has finished.
pub const CONDITION_TEST_COMPLETED: &str = "TestCompleted";
/// The spec was edited after the resources were created.
pub const CONDITION_SPEC_DRIFTED: &str = "SpecDrifted";
/// Pods are running without errors.
pub const CONDITION_PODS_HEALTHY: &str = "PodsHealthy";

/// Ready is false while resources are created.
pub const REASON_RESOURCES_CREATING: &str = "ResourcesCreating";
/// Ready is true.
pub const REASON_RESOURCES_CREATED: &str = "ResourcesCreated";
/// Ready is false because the test failed.
pub const REASON_RESOURCES_FAILED: &str = "ResourcesFailed";
/// Workers have not connected yet.
pub const REASON_WAITING_FOR_WORKERS: &str = "WaitingForWorkers";
/// Every expected worker is active.
pub const REASON_ALL_WORKERS_CONNECTED: &str = "AllWorkersConnected";
/// Fewer workers than expected are active.
pub const REASON_WORKERS_MISSING: &str = "WorkersMissing";
/// The test is still running.
pub const REASON_TEST_IN_PROGRESS: &str = "TestInProgress";
/// The master job completed.
pub const REASON_TEST_SUCCEEDED: &str = "TestSucceeded";
/// The master job failed.
pub const REASON_TEST_FAILED: &str = "TestFailed";
/// The spec was edited and the edit ignored.
pub const REASON_SPEC_CHANGE_IGNORED: &str = "SpecChangeIgnored";

/// Set a condition in place.
///
/// The transition time only moves when the status value flips, reason and message are always
/// refreshed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    generation: i64,
    now: DateTime<Utc>,
) {
    let status = if status { "True" } else { "False" };
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status.to_owned();
                existing.last_transition_time = Time(now);
            }
            existing.reason = reason.to_owned();
            existing.message = message.to_owned();
            existing.observed_generation = Some(generation);
        }
        None => conditions.push(Condition {
            type_: type_.to_owned(),
            status: status.to_owned(),
            reason: reason.to_owned(),
            message: message.to_owned(),
            observed_generation: Some(generation),
            last_transition_time: Time(now),
        }),
    }
}

/// Status of a LocustTest seen for the first time.
pub fn initial_status(replicas: i32, generation: i64, now: DateTime<Utc>) -> LocustTestStatus {
    let mut status = LocustTestStatus {
        phase: Some(Phase::Pending),
        expected_workers: replicas,
        connected_workers: 0,
        ..Default::default()
    };
    let conditions = &mut status.conditions;
    set_condition(
        conditions,
        CONDITION_READY,
        false,
        REASON_RESOURCES_CREATING,
        "Creating resources",
        generation,
        now,
    );
    set_condition(
        conditions,
        CONDITION_WORKERS_CONNECTED,
        false,
        REASON_WAITING_FOR_WORKERS,
        "Waiting for workers to connect",
        generation,
        now,
    );
    set_condition(
        conditions,
        CONDITION_TEST_COMPLETED,
        false,
        REASON_TEST_IN_PROGRESS,
        "Test has not started",
        generation,
        now,
    );
    set_condition(
        conditions,
        CONDITION_PODS_HEALTHY,
        true,
        REASON_PODS_STARTING,
        "Waiting for pods to be created",
        generation,
        now,
    );
    status
}

/// Record that every derived resource exists and the test is running.
pub fn mark_resources_created(status: &mut LocustTestStatus, generation: i64, now: DateTime<Utc>) {
    status.phase = Some(Phase::Running);
    status.observed_generation = generation;
    if status.start_time.is_none() {
        status.start_time = Some(Time(now));
    }
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        true,
        REASON_RESOURCES_CREATED,
        "All resources created",
        generation,
        now,
    );
}

/// Send the test back to Pending so the missing resources are created again.
pub fn mark_recreating(status: &mut LocustTestStatus, generation: i64, now: DateTime<Utc>) {
    status.phase = Some(Phase::Pending);
    status.observed_generation = generation;
    set_condition(
        &mut status.conditions,
        CONDITION_READY,
        false,
        REASON_RESOURCES_CREATING,
        "Recreating externally deleted resources",
        generation,
        now,
    );
}

/// Phase signalled by the master job.
///
/// Completion wins over failure when a job reports both. A job without any signal yields None.
pub fn phase_from_job(job: &Job) -> Option<Phase> {
    let status = job.status.as_ref()?;
    let signalled = |type_: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == type_ && c.status == "True")
    };
    if signalled("Complete") {
        Some(Phase::Succeeded)
    } else if signalled("Failed") {
        Some(Phase::Failed)
    } else if status.active.unwrap_or_default() > 0 {
        Some(Phase::Running)
    } else {
        None
    }
}

/// Fold the state of the jobs and pods into the status.
///
/// Returns the new phase when it changed.
pub fn apply_observed_state(
    status: &mut LocustTestStatus,
    generation: i64,
    master: &Job,
    worker: &Job,
    health: &PodHealthStatus,
    now: DateTime<Utc>,
) -> Option<Phase> {
    let mut transition = None;
    if let Some(phase) = phase_from_job(master) {
        if status.phase != Some(phase) {
            status.phase = Some(phase);
            transition = Some(phase);
            match phase {
                Phase::Running => {
                    status.start_time.get_or_insert(Time(now));
                }
                Phase::Succeeded => {
                    status.completion_time.get_or_insert(Time(now));
                    set_condition(
                        &mut status.conditions,
                        CONDITION_TEST_COMPLETED,
                        true,
                        REASON_TEST_SUCCEEDED,
                        "Test completed successfully",
                        generation,
                        now,
                    );
                }
                Phase::Failed => {
                    status.completion_time.get_or_insert(Time(now));
                    set_condition(
                        &mut status.conditions,
                        CONDITION_TEST_COMPLETED,
                        true,
                        REASON_TEST_FAILED,
                        "Test failed",
                        generation,
                        now,
                    );
                    set_condition(
                        &mut status.conditions,
                        CONDITION_READY,
                        false,
                        REASON_RESOURCES_FAILED,
                        "Test failed",
                        generation,
                        now,
                    );
                }
                Phase::Pending => {}
            }
        }
    }

    status.connected_workers = worker
        .status
        .as_ref()
        .and_then(|s| s.active)
        .unwrap_or_default();
    let all_connected = status.connected_workers >= status.expected_workers;
    set_condition(
        &mut status.conditions,
        CONDITION_WORKERS_CONNECTED,
        all_connected,
        if all_connected {
            REASON_ALL_WORKERS_CONNECTED
        } else {
            REASON_WORKERS_MISSING
        },
        &format!(
            "{}/{} workers connected",
            status.connected_workers, status.expected_workers
        ),
        generation,
        now,
    );

    if generation > status.observed_generation {
        set_condition(
            &mut status.conditions,
            CONDITION_SPEC_DRIFTED,
            true,
            REASON_SPEC_CHANGE_IGNORED,
            "Spec changes after creation are not applied to running tests. \
             Delete and recreate the LocustTest to apply them",
            generation,
            now,
        );
    }

    set_condition(
        &mut status.conditions,
        CONDITION_PODS_HEALTHY,
        health.healthy,
        &health.reason,
        &health.message,
        generation,
        now,
    );

    status.observed_generation = generation;
    transition
}

#[cfg(test)]
mod tests {
    use k8s_openapi::{
        api::batch::v1::{JobCondition, JobStatus},
        chrono::TimeZone,
    };

    use super::*;

    fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
        conditions.iter().find(|c| c.type_ == type_)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
            + k8s_openapi::chrono::Duration::seconds(secs)
    }

    fn job(active: i32, conditions: &[(&str, &str)]) -> Job {
        Job {
            status: Some(JobStatus {
                active: Some(active),
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(type_, status)| JobCondition {
                            type_: type_.to_string(),
                            status: status.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn starting() -> PodHealthStatus {
        PodHealthStatus {
            healthy: true,
            reason: REASON_PODS_STARTING.to_owned(),
            message: "Waiting for pods to be created".to_owned(),
            failed_pods: Vec::new(),
            in_grace_period: false,
            requeue_after: None,
        }
    }

    fn running_status() -> LocustTestStatus {
        let mut status = initial_status(2, 1, t(0));
        mark_resources_created(&mut status, 1, t(1));
        status
    }

    #[test]
    fn initial_status_has_four_conditions() {
        let status = initial_status(3, 1, t(0));
        assert_eq!(status.phase, Some(Phase::Pending));
        assert_eq!(status.expected_workers, 3);
        let types: Vec<&str> = status.conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(
            types,
            vec!["Ready", "WorkersConnected", "TestCompleted", "PodsHealthy"]
        );
        let pods = find_condition(&status.conditions, CONDITION_PODS_HEALTHY).unwrap();
        assert_eq!(pods.status, "True");
        assert_eq!(pods.reason, REASON_PODS_STARTING);
    }

    #[test]
    fn transition_time_moves_only_on_status_change() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_READY, false, "A", "a", 1, t(0));
        set_condition(&mut conditions, CONDITION_READY, false, "B", "b", 2, t(10));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Time(t(0)));
        assert_eq!(conditions[0].reason, "B");
        assert_eq!(conditions[0].observed_generation, Some(2));
        set_condition(&mut conditions, CONDITION_READY, true, "C", "c", 2, t(20));
        assert_eq!(conditions[0].last_transition_time, Time(t(20)));
    }

    #[test]
    fn completion_wins_over_failure() {
        let both = job(0, &[("Failed", "True"), ("Complete", "True")]);
        assert_eq!(phase_from_job(&both), Some(Phase::Succeeded));
        assert_eq!(phase_from_job(&job(0, &[("Failed", "True")])), Some(Phase::Failed));
        assert_eq!(phase_from_job(&job(1, &[("Complete", "False")])), Some(Phase::Running));
        assert_eq!(phase_from_job(&job(0, &[])), None);
        assert_eq!(phase_from_job(&Job::default()), None);
    }

    #[test]
    fn success_stamps_completion_once() {
        let mut status = running_status();
        let done = job(0, &[("Complete", "True")]);
        let transition =
            apply_observed_state(&mut status, 1, &done, &job(2, &[]), &starting(), t(100));
        assert_eq!(transition, Some(Phase::Succeeded));
        assert_eq!(status.completion_time, Some(Time(t(100))));
        let completed = find_condition(&status.conditions, CONDITION_TEST_COMPLETED).unwrap();
        assert_eq!(completed.reason, REASON_TEST_SUCCEEDED);

        let transition =
            apply_observed_state(&mut status, 1, &done, &job(0, &[]), &starting(), t(200));
        assert_eq!(transition, None);
        assert_eq!(status.completion_time, Some(Time(t(100))));
    }

    #[test]
    fn failure_flips_ready() {
        let mut status = running_status();
        let failed = job(0, &[("Failed", "True")]);
        let transition =
            apply_observed_state(&mut status, 1, &failed, &job(0, &[]), &starting(), t(50));
        assert_eq!(transition, Some(Phase::Failed));
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason, REASON_RESOURCES_FAILED);
    }

    #[test]
    fn workers_connected_tracks_worker_job() {
        let mut status = running_status();
        apply_observed_state(&mut status, 1, &job(1, &[]), &job(1, &[]), &starting(), t(5));
        let workers = find_condition(&status.conditions, CONDITION_WORKERS_CONNECTED).unwrap();
        assert_eq!(workers.status, "False");
        assert_eq!(workers.message, "1/2 workers connected");

        apply_observed_state(&mut status, 1, &job(1, &[]), &job(2, &[]), &starting(), t(6));
        let workers = find_condition(&status.conditions, CONDITION_WORKERS_CONNECTED).unwrap();
        assert_eq!(workers.status, "True");
        assert_eq!(workers.reason, REASON_ALL_WORKERS_CONNECTED);
        assert_eq!(status.connected_workers, 2);
    }

    #[test]
    fn spec_drift_is_recorded() {
        let mut status = running_status();
        apply_observed_state(&mut status, 2, &job(1, &[]), &job(2, &[]), &starting(), t(5));
        let drifted = find_condition(&status.conditions, CONDITION_SPEC_DRIFTED).unwrap();
        assert_eq!(drifted.status, "True");
        assert!(drifted.message.contains("Delete and recreate"));
        assert_eq!(status.observed_generation, 2);
    }

    #[test]
    fn reapplying_the_same_state_is_stable() {
        let mut status = running_status();
        apply_observed_state(&mut status, 1, &job(1, &[]), &job(2, &[]), &starting(), t(5));
        let first = status.clone();
        let transition =
            apply_observed_state(&mut status, 1, &job(1, &[]), &job(2, &[]), &starting(), t(60));
        assert_eq!(transition, None);
        assert_eq!(status, first);
    }

    #[test]
    fn recreating_resets_phase() {
        let mut status = running_status();
        mark_recreating(&mut status, 1, t(10));
        assert_eq!(status.phase, Some(Phase::Pending));
        let ready = find_condition(&status.conditions, CONDITION_READY).unwrap();
        assert_eq!(ready.status, "False");
        assert_eq!(ready.message, "Recreating externally deleted resources");
        assert_eq!(status.start_time, Some(Time(t(1))));
    }
}
