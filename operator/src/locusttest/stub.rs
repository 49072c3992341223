//! Helper methods only available for tests

use k8s_openapi::{
    api::batch::v1::{Job, JobCondition, JobStatus},
    chrono::{DateTime, TimeZone, Utc},
};
use kube::Resource;

use crate::{
    config::OperatorConfig,
    locusttest::{
        controller::FINALIZER_NAME,
        job::{master_job, worker_job},
        status::{initial_status, mark_resources_created},
        LocustTest, LocustTestSpec, LocustTestStatus, MasterSpec, TestFilesConfig, WorkerSpec,
    },
};

/// Instant every test clock is frozen at.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// A normal test with three workers, already carrying the finalizer.
pub fn locust_test() -> LocustTest {
    let mut test = LocustTest::new(
        "demo",
        LocustTestSpec {
            image: "locustio/locust:2.20.0".to_owned(),
            master: MasterSpec {
                command: "locust -f /lotest/src/demo.py".to_owned(),
                ..Default::default()
            },
            worker: WorkerSpec {
                command: "locust -f /lotest/src/demo.py".to_owned(),
                replicas: 3,
                ..Default::default()
            },
            test_files: Some(TestFilesConfig {
                config_map_ref: Some("demo-scripts".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let meta = test.meta_mut();
    meta.namespace = Some("test".to_owned());
    meta.uid = Some("1234".to_owned());
    meta.generation = Some(1);
    meta.resource_version = Some("1".to_owned());
    meta.finalizers = Some(vec![FINALIZER_NAME.to_owned()]);
    test
}

impl LocustTest {
    /// Modify a test to have an expected status
    pub fn with_status(self, status: LocustTestStatus) -> Self {
        Self {
            status: Some(status),
            ..self
        }
    }
}

/// Status of a test whose resources were just created.
pub fn running_status() -> LocustTestStatus {
    let mut status = initial_status(3, 1, now());
    mark_resources_created(&mut status, 1, now());
    status
}

/// Master job of the stub test in the given state.
pub fn master_job_with(status: JobStatus) -> Job {
    Job {
        status: Some(status),
        ..master_job(&locust_test(), &OperatorConfig::default())
    }
}

/// Worker job of the stub test with the given number of active pods.
pub fn worker_job_with(active: i32) -> Job {
    Job {
        status: Some(JobStatus {
            active: Some(active),
            ..Default::default()
        }),
        ..worker_job(&locust_test(), &OperatorConfig::default())
    }
}

/// Job status carrying a single true condition.
pub fn finished(type_: &str) -> JobStatus {
    JobStatus {
        conditions: Some(vec![JobCondition {
            type_: type_.to_owned(),
            status: "True".to_owned(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
