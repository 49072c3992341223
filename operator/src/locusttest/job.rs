use std::collections::BTreeMap;

use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements},
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::{
    config::{MetricsExporterConfig, OperatorConfig},
    labels::{managed_labels, pod_labels},
    locusttest::{
        command::{build_master_command, build_worker_command},
        env::{env_from, env_vars},
        node_name,
        resources::resolve_resources,
        volumes::{volume_mounts, volumes},
        LocustTest, Role, MASTER_BIND_PORT, MASTER_PORT, WEB_UI_PORT, WORKER_PORT,
    },
};

/// Name of the metrics exporter sidecar of the master.
pub const METRICS_EXPORTER_CONTAINER_NAME: &str = "locust-metrics-exporter";

const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Job running the single master node.
pub fn master_job(test: &LocustTest, config: &OperatorConfig) -> Job {
    let command = build_master_command(
        &test.spec.master,
        test.spec.worker.replicas,
        test.otel_enabled(),
    );
    job(test, config, Role::Master, command)
}

/// Job running the worker nodes, one pod per replica.
pub fn worker_job(test: &LocustTest, config: &OperatorConfig) -> Job {
    let master_host = node_name(&test.name_any(), Role::Master);
    let command = build_worker_command(
        &test.spec.worker.command,
        &master_host,
        test.otel_enabled(),
        test.spec.worker.extra_args.as_deref(),
    );
    job(test, config, Role::Worker, command)
}

fn job(test: &LocustTest, config: &OperatorConfig, role: Role, command: Vec<String>) -> Job {
    let test_name = test.name_any();
    let name = node_name(&test_name, role);
    let (user_labels, parallelism) = match role {
        Role::Master => (test.spec.master.labels.as_ref(), 1),
        Role::Worker => (test.spec.worker.labels.as_ref(), test.spec.worker.replicas),
    };

    let mut containers = vec![locust_container(test, config, role, &name, command)];
    if role == Role::Master && !test.otel_enabled() {
        containers.push(metrics_exporter_container(&config.metrics_exporter));
    }

    let scheduling = test.spec.scheduling.as_ref();
    let affinity = scheduling
        .and_then(|s| s.affinity.clone())
        .filter(|_| config.enable_affinity_injection);
    let tolerations = scheduling
        .and_then(|s| s.tolerations.clone())
        .filter(|_| config.enable_tolerations_injection);
    let volumes = volumes(test, role, &name);

    Job {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: test.namespace(),
            owner_references: test.controller_owner_ref(&()).map(|oref| vec![oref]),
            labels: managed_labels(),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: config.job_ttl_seconds_after_finished,
            parallelism: Some(parallelism),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels(&test_name, &name, user_labels)),
                    annotations: annotations(test, config, role),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_owned()),
                    image_pull_secrets: test.spec.image_pull_secrets.clone(),
                    containers,
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    affinity,
                    tolerations,
                    node_selector: scheduling.and_then(|s| s.node_selector.clone()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod annotations. The master advertises the exporter to Prometheus unless OpenTelemetry is
/// enabled, user annotations are applied on top.
fn annotations(
    test: &LocustTest,
    config: &OperatorConfig,
    role: Role,
) -> Option<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    if role == Role::Master && !test.otel_enabled() {
        annotations.insert("prometheus.io/scrape".to_owned(), "true".to_owned());
        annotations.insert("prometheus.io/path".to_owned(), "/metrics".to_owned());
        annotations.insert(
            "prometheus.io/port".to_owned(),
            config.metrics_exporter.port.to_string(),
        );
    }
    let user = match role {
        Role::Master => test.spec.master.annotations.as_ref(),
        Role::Worker => test.spec.worker.annotations.as_ref(),
    };
    if let Some(user) = user {
        annotations.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    (!annotations.is_empty()).then_some(annotations)
}

fn container_port(port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        ..Default::default()
    }
}

fn locust_container(
    test: &LocustTest,
    config: &OperatorConfig,
    role: Role,
    name: &str,
    command: Vec<String>,
) -> Container {
    let (ports, declared) = match role {
        Role::Master => (
            vec![
                container_port(MASTER_PORT),
                container_port(MASTER_BIND_PORT),
                container_port(WEB_UI_PORT),
            ],
            test.spec.master.resources.as_ref(),
        ),
        Role::Worker => (
            vec![container_port(WORKER_PORT)],
            test.spec.worker.resources.as_ref(),
        ),
    };
    let mounts = volume_mounts(test, role, name);
    Container {
        name: name.to_owned(),
        image: Some(test.spec.image.clone()),
        image_pull_policy: Some(
            test.spec
                .image_pull_policy
                .clone()
                .filter(|policy| !policy.is_empty())
                .unwrap_or_else(|| DEFAULT_IMAGE_PULL_POLICY.to_owned()),
        ),
        args: Some(command),
        ports: Some(ports),
        resources: Some(resolve_resources(role, declared, config)),
        env: Some(env_vars(test, &config.kafka)),
        env_from: env_from(test),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    }
}

fn metrics_exporter_container(exporter: &MetricsExporterConfig) -> Container {
    Container {
        name: METRICS_EXPORTER_CONTAINER_NAME.to_owned(),
        image: Some(exporter.image.clone()),
        image_pull_policy: Some(exporter.image_pull_policy.clone()),
        ports: Some(vec![container_port(exporter.port)]),
        resources: Some(ResourceRequirements::from(&exporter.resources)),
        env: Some(vec![
            k8s_openapi::api::core::v1::EnvVar {
                name: "LOCUST_EXPORTER_URI".to_owned(),
                value: Some(format!("http://localhost:{WEB_UI_PORT}")),
                ..Default::default()
            },
            k8s_openapi::api::core::v1::EnvVar {
                name: "LOCUST_EXPORTER_WEB_LISTEN_ADDRESS".to_owned(),
                value: Some(format!(":{}", exporter.port)),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{Affinity, NodeAffinity, Toleration};

    use super::*;
    use crate::locusttest::{stub::locust_test, SchedulingConfig};

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .unwrap()
    }

    fn container_names(job: &Job) -> Vec<&str> {
        pod_spec(job)
            .containers
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    fn scheduled_test() -> LocustTest {
        let mut test = locust_test();
        test.spec.scheduling = Some(SchedulingConfig {
            affinity: Some(Affinity {
                node_affinity: Some(NodeAffinity::default()),
                ..Default::default()
            }),
            tolerations: Some(vec![Toleration {
                key: Some("dedicated".to_owned()),
                operator: Some("Exists".to_owned()),
                ..Default::default()
            }]),
            node_selector: Some(BTreeMap::from_iter([(
                "pool".to_owned(),
                "load".to_owned(),
            )])),
        });
        test
    }

    #[test]
    fn master_job_runs_one_pod_with_exporter() {
        let job = master_job(&locust_test(), &OperatorConfig::default());
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.parallelism, Some(1));
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, None);
        assert_eq!(
            container_names(&job),
            vec!["demo-master", METRICS_EXPORTER_CONTAINER_NAME]
        );
        let pod = pod_spec(&job);
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let main = &pod.containers[0];
        assert_eq!(main.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(
            main.args.as_ref().unwrap()[..3],
            ["locust", "-f", "/lotest/src/demo.py"]
        );
        let annotations = spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .unwrap();
        assert_eq!(annotations["prometheus.io/port"], "9646");
        let sidecar_env = pod.containers[1].env.as_ref().unwrap();
        assert_eq!(sidecar_env[1].value.as_deref(), Some(":9646"));
    }

    #[test]
    fn worker_job_matches_replicas_without_sidecar() {
        let mut config = OperatorConfig::default();
        config.job_ttl_seconds_after_finished = Some(300);
        let job = worker_job(&locust_test(), &config);
        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.parallelism, Some(3));
        assert_eq!(spec.ttl_seconds_after_finished, Some(300));
        assert_eq!(container_names(&job), vec!["demo-worker"]);
        let args = pod_spec(&job).containers[0].args.clone().unwrap();
        assert!(args.contains(&"--master-host=demo-master".to_owned()));
        let labels = spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.as_ref())
            .unwrap();
        assert_eq!(labels["performance-test-pod-name"], "demo-worker");
        assert_eq!(labels["performance-test-name"], "demo");
        assert!(spec
            .template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .is_none());
    }

    #[test]
    fn otel_drops_sidecar_and_scrape_annotations() {
        let mut test = locust_test();
        test.spec.observability = Some(crate::locusttest::ObservabilityConfig {
            open_telemetry: Some(crate::locusttest::OpenTelemetryConfig {
                enabled: true,
                endpoint: Some("otel:4317".to_owned()),
                ..Default::default()
            }),
        });
        let job = master_job(&test, &OperatorConfig::default());
        assert_eq!(container_names(&job), vec!["demo-master"]);
        let args = pod_spec(&job).containers[0].args.clone().unwrap();
        assert!(args.contains(&"--otel".to_owned()));
    }

    #[test]
    fn scheduling_injection_is_gated() {
        let test = scheduled_test();
        let job = worker_job(&test, &OperatorConfig::default());
        let pod = pod_spec(&job);
        assert!(pod.affinity.is_none());
        assert!(pod.tolerations.is_none());
        assert_eq!(pod.node_selector.as_ref().unwrap()["pool"], "load");

        let config = OperatorConfig {
            enable_affinity_injection: true,
            enable_tolerations_injection: true,
            ..Default::default()
        };
        let job = worker_job(&test, &config);
        let pod = pod_spec(&job);
        assert!(pod.affinity.is_some());
        assert_eq!(pod.tolerations.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn jobs_are_owned_and_labelled() {
        let job = master_job(&locust_test(), &OperatorConfig::default());
        assert_eq!(job.metadata.namespace.as_deref(), Some("test"));
        assert_eq!(
            job.metadata.labels.as_ref().unwrap()["managed-by"],
            "locust-k8s-operator"
        );
        let owner = &job.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.name, "demo");
        assert_eq!(owner.uid, "1234");
    }
}
