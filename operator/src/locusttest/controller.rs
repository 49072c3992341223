use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::stream::StreamExt;
use k8s_openapi::{
    api::{
        batch::v1::Job,
        core::v1::{Pod, Service},
    },
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
};
use kube::{
    api::PostParams,
    client::Client,
    runtime::{
        controller::Action,
        events::{Event, EventType},
        reflector::{self, ObjectRef, Store},
        watcher::{self, Config},
        Controller, WatchStreamExt,
    },
    Api, CustomResourceExt, Resource, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    config::OperatorConfig,
    labels::MANAGED_BY_LABEL_SELECTOR,
    locusttest::{
        health::check_pod_health,
        job::{master_job, worker_job},
        node_name,
        service::master_service,
        status::{apply_observed_state, initial_status, mark_recreating, mark_resources_created},
        LocustTest, LocustTestStatus, Phase, Role,
    },
    utils::{
        create_if_absent,
        retry::{retry_on_conflict, RetryConfig},
        Clock, Context, EventPublisher,
    },
};

/// Finalizer holding a LocustTest until its deletion has been observed.
pub const FINALIZER_NAME: &str = "locust.io/cleanup";

/// Delay before recreating resources deleted behind the operator's back.
const RECREATE_REQUEUE: Duration = Duration::from_secs(1);

/// Handle errors during reconciliation.
fn on_error(
    test: Arc<LocustTest>,
    error: &Error,
    _context: Arc<Context<impl EventPublisher, impl Clock>>,
) -> Action {
    warn!(test = %test.name_any(), %error, "reconcile failed, requeueing");
    Action::requeue(Duration::from_secs(5))
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Errors of the operator itself.
    #[error("App error: {source}")]
    App {
        /// Underlying error.
        #[from]
        source: anyhow::Error,
    },
    /// Errors talking to the API server.
    #[error("Kube error: {source}")]
    Kube {
        /// Underlying error.
        #[from]
        source: kube::Error,
    },
}

/// Start a controller for the LocustTest CRD.
pub async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    let k_client = Client::try_default().await?;

    let crds: Api<CustomResourceDefinition> = Api::all(k_client.clone());
    if crds.get_opt(LocustTest::crd_name()).await?.is_none() {
        return Err(anyhow!(
            "CRD {} is not installed, apply the output of crdgen first",
            LocustTest::crd_name()
        ));
    }

    let context = Arc::new(Context::new(k_client.clone(), config));

    let locust_tests: Api<LocustTest> = Api::all(k_client.clone());
    let services = Api::<Service>::all(k_client.clone());
    let jobs = Api::<Job>::all(k_client.clone());
    let pods = Api::<Pod>::all(k_client.clone());
    let managed = || Config::default().labels(MANAGED_BY_LABEL_SELECTOR);

    // Jobs are mirrored locally so pod events can be traced back to their test.
    let (job_store, writer) = reflector::store();
    let job_reflector = tokio::spawn(
        reflector::reflector(writer, watcher::watcher(jobs.clone(), managed()))
            .default_backoff()
            .touched_objects()
            .for_each(|_| futures::future::ready(())),
    );

    info!("starting LocustTest controller");
    let controller = Controller::new(locust_tests, Config::default())
        .owns(services, managed())
        .owns(jobs, managed())
        .watches(pods, managed(), move |pod| {
            map_pod_to_test(&pod, &job_store)
        })
        .shutdown_on_signal()
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((test, _)) => {
                    debug!(test = %test.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        });
    supervise(controller, job_reflector).await
}

/// Drive the controller until it stops.
///
/// The job reflector must outlive the controller, without it pods no longer map to their test.
async fn supervise(
    controller: impl Future<Output = ()>,
    mut job_reflector: JoinHandle<()>,
) -> anyhow::Result<()> {
    tokio::select! {
        _ = controller => {
            job_reflector.abort();
            info!("LocustTest controller stopped");
            Ok(())
        }
        res = &mut job_reflector => {
            error!(?res, "job reflector stopped");
            Err(anyhow!("job reflector stopped before the controller"))
        }
    }
}

/// Resolve the LocustTest owning a pod through the Job that owns the pod.
pub fn map_pod_to_test(pod: &Pod, jobs: &Store<Job>) -> Option<ObjectRef<LocustTest>> {
    let ns = pod.namespace()?;
    let job_owner = pod
        .owner_references()
        .iter()
        .find(|o| o.kind == "Job" && o.controller == Some(true))?;
    let job = jobs.get(&ObjectRef::new(&job_owner.name).within(&ns))?;
    let test_owner = job
        .owner_references()
        .iter()
        .find(|o| o.kind == LocustTest::kind(&()) && o.controller == Some(true))?;
    Some(ObjectRef::new(&test_owner.name).within(&ns))
}

/// Perform a reconcile pass for the LocustTest CRD
async fn reconcile(
    test: Arc<LocustTest>,
    cx: Arc<Context<impl EventPublisher, impl Clock>>,
) -> Result<Action, Error> {
    let meter = global::meter("locust-operator");
    let runs = meter
        .u64_counter("locusttest_reconcile_count")
        .with_description("Number of LocustTest reconciles")
        .init();

    match reconcile_(test, cx).await {
        Ok(action) => {
            runs.add(
                1,
                &[KeyValue {
                    key: "result".into(),
                    value: "ok".into(),
                }],
            );
            Ok(action)
        }
        Err(err) => {
            runs.add(
                1,
                &[KeyValue {
                    key: "result".into(),
                    value: "err".into(),
                }],
            );
            Err(err)
        }
    }
}

/// Perform a reconcile pass for the LocustTest CRD
async fn reconcile_(
    test: Arc<LocustTest>,
    cx: Arc<Context<impl EventPublisher, impl Clock>>,
) -> Result<Action, Error> {
    let name = test.name_any();
    let ns = test
        .namespace()
        .ok_or_else(|| anyhow!("LocustTest {name} has no namespace"))?;
    let api: Api<LocustTest> = Api::namespaced(cx.k_client.clone(), &ns);

    if test.meta().deletion_timestamp.is_some() {
        return finalize(&api, &test, &cx).await;
    }

    let mut test = (*test).clone();
    if !has_finalizer(&test) {
        test.finalizers_mut().push(FINALIZER_NAME.to_owned());
        test = api.replace(&name, &PostParams::default(), &test).await?;
        debug!(test = %name, "finalizer added");
    }

    let generation = test.meta().generation.unwrap_or_default();
    let now = cx.clock.now();

    if test.phase().is_none() {
        let replicas = test.spec.worker.replicas;
        let (initialized, _) = update_status(&api, &name, &cx.retry, |status| {
            if status.phase.is_none() {
                *status = initial_status(replicas, generation, now);
            }
        })
        .await?;
        test = initialized;
        info!(test = %name, "status initialized");
    }

    let Some(phase) = test.phase() else {
        return Err(anyhow!("LocustTest {name} has no phase after initialization").into());
    };
    debug!(test = %name, %phase, generation, "reconcile");

    if phase == Phase::Pending {
        return create_resources(&api, &test, &cx).await;
    }

    let services: Api<Service> = Api::namespaced(cx.k_client.clone(), &ns);
    let jobs: Api<Job> = Api::namespaced(cx.k_client.clone(), &ns);
    let master_name = node_name(&name, Role::Master);
    let worker_name = node_name(&name, Role::Worker);

    let service = services.get_opt(&master_name).await?;
    let master = jobs.get_opt(&master_name).await?;
    let worker = jobs.get_opt(&worker_name).await?;
    let (master, worker) = match (service, master, worker) {
        (Some(_), Some(master), Some(worker)) => (master, worker),
        (service, master, _) => {
            let (kind, missing) = if service.is_none() {
                ("Service", &master_name)
            } else if master.is_none() {
                ("Job", &master_name)
            } else {
                ("Job", &worker_name)
            };
            return recover_deleted(&api, &test, kind, missing, &cx).await;
        }
    };

    // Terminal tests are only watched for deleted resources.
    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    let health = check_pod_health(cx.k_client.clone(), &test, now).await;
    let (_, transition) = update_status(&api, &name, &cx.retry, |status| {
        apply_observed_state(status, generation, &master, &worker, &health, now)
    })
    .await?;

    if let Some(phase) = transition {
        info!(test = %name, %phase, "phase changed");
        match phase {
            Phase::Running => {
                publish(&cx, &test, EventType::Normal, "TestStarted", "Load test execution started")
                    .await
            }
            Phase::Succeeded => {
                publish(
                    &cx,
                    &test,
                    EventType::Normal,
                    "TestCompleted",
                    "Load test completed successfully",
                )
                .await
            }
            Phase::Failed => {
                publish(&cx, &test, EventType::Warning, "TestFailed", "Load test execution failed")
                    .await
            }
            Phase::Pending => {}
        }
    }

    if !health.healthy {
        warn!(test = %name, reason = %health.reason, message = %health.message, "pods unhealthy");
    }

    Ok(health
        .requeue_after
        .map(Action::requeue)
        .unwrap_or_else(Action::await_change))
}

fn has_finalizer(test: &LocustTest) -> bool {
    test.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

/// Release the finalizer of a test being deleted. Owned resources are garbage collected.
async fn finalize(
    api: &Api<LocustTest>,
    test: &LocustTest,
    cx: &Context<impl EventPublisher, impl Clock>,
) -> Result<Action, Error> {
    if !has_finalizer(test) {
        return Ok(Action::await_change());
    }
    let name = test.name_any();
    info!(test = %name, "LocustTest deleted, owned resources are cleaned up by owner references");
    publish(
        cx,
        test,
        EventType::Normal,
        "Deleting",
        "LocustTest and owned resources being cleaned up",
    )
    .await;

    let mut test = test.clone();
    test.finalizers_mut().retain(|f| f != FINALIZER_NAME);
    match api.replace(&name, &PostParams::default(), &test).await {
        Ok(_) => Ok(Action::await_change()),
        Err(kube::Error::Api(err)) if err.reason == "NotFound" => Ok(Action::await_change()),
        Err(e) => Err(e.into()),
    }
}

/// Create the service and both jobs, then mark the test as running.
async fn create_resources(
    api: &Api<LocustTest>,
    test: &LocustTest,
    cx: &Context<impl EventPublisher, impl Clock>,
) -> Result<Action, Error> {
    let name = test.name_any();
    let ns = test.namespace().unwrap_or_default();
    let services: Api<Service> = Api::namespaced(cx.k_client.clone(), &ns);
    let jobs: Api<Job> = Api::namespaced(cx.k_client.clone(), &ns);

    let service = master_service(test, &cx.config);
    if create_if_absent(&services, &service).await? {
        created(cx, test, "Service", &service.name_any()).await;
    }
    for job in [master_job(test, &cx.config), worker_job(test, &cx.config)] {
        if create_if_absent(&jobs, &job).await? {
            created(cx, test, "Job", &job.name_any()).await;
        }
    }

    let generation = test.meta().generation.unwrap_or_default();
    let now = cx.clock.now();
    let (_, first_start) = update_status(api, &name, &cx.retry, |status| {
        let first_start = status.start_time.is_none();
        mark_resources_created(status, generation, now);
        first_start
    })
    .await?;

    if first_start {
        publish(cx, test, EventType::Normal, "TestStarted", "Load test execution started").await;
    }
    Ok(Action::await_change())
}

async fn created(
    cx: &Context<impl EventPublisher, impl Clock>,
    test: &LocustTest,
    kind: &str,
    name: &str,
) {
    info!(test = %test.name_any(), kind, name, "created resource");
    publish(cx, test, EventType::Normal, "Created", &format!("Created {kind} {name}")).await;
}

/// Send a test back to Pending after one of its resources disappeared.
async fn recover_deleted(
    api: &Api<LocustTest>,
    test: &LocustTest,
    kind: &str,
    missing: &str,
    cx: &Context<impl EventPublisher, impl Clock>,
) -> Result<Action, Error> {
    let name = test.name_any();
    info!(test = %name, kind, missing, "resource deleted externally, transitioning to Pending");
    publish(
        cx,
        test,
        EventType::Warning,
        "ResourceDeleted",
        &format!("{kind} {missing} was deleted externally, will attempt recreation"),
    )
    .await;

    let generation = test.meta().generation.unwrap_or_default();
    let now = cx.clock.now();
    update_status(api, &name, &cx.retry, |status| {
        mark_recreating(status, generation, now)
    })
    .await?;
    Ok(Action::requeue(RECREATE_REQUEUE))
}

/// Read, mutate and write the status of a test, retrying when another writer got there first.
///
/// The write is skipped when the mutation leaves the status unchanged. Returns the latest
/// object together with the value produced by the mutation.
async fn update_status<R>(
    api: &Api<LocustTest>,
    name: &str,
    retry: &RetryConfig,
    mutate: impl Fn(&mut LocustTestStatus) -> R,
) -> Result<(LocustTest, R), kube::Error> {
    let mutate = &mutate;
    retry_on_conflict(retry, "update_status", || async move {
        let mut test = api.get(name).await?;
        let before = test.status.clone();
        let result = mutate(test.status.get_or_insert_with(Default::default));
        if test.status == before {
            return Ok((test, result));
        }
        let data = serde_json::to_vec(&test).map_err(kube::Error::SerdeError)?;
        let test = api
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok((test, result))
    })
    .await
}

/// Publish an event about a test. Failures are logged and otherwise ignored.
async fn publish(
    cx: &Context<impl EventPublisher, impl Clock>,
    test: &LocustTest,
    type_: EventType,
    reason: &str,
    note: &str,
) {
    let event = Event {
        type_,
        reason: reason.to_owned(),
        note: Some(note.to_owned()),
        action: reason.to_owned(),
        secondary: None,
    };
    if let Err(err) = cx.events.publish(&test.object_ref(&()), event).await {
        warn!(test = %test.name_any(), reason, %err, "failed to publish event");
    }
}
