use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        Affinity, EnvVar, LocalObjectReference, ResourceRequirements, Toleration, Volume,
        VolumeMount,
    },
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Primary CRD for declaring a distributed Locust load test.
///
/// The spec is read once when the derived resources are created. Later edits are recorded
/// through the SpecDrifted condition but never applied to running workloads.
#[derive(CustomResource, Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "locust.io",
    version = "v2",
    kind = "LocustTest",
    plural = "locusttests",
    shortname = "lotest",
    status = "LocustTestStatus",
    derive = "PartialEq",
    derive = "Default",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Workers","type":"integer","jsonPath":".status.connectedWorkers"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LocustTestSpec {
    /// Container image for the master and worker pods.
    pub image: String,
    /// Pull policy for the Locust image, defaults to IfNotPresent.
    pub image_pull_policy: Option<String>,
    /// Secrets used to pull the image from a private registry.
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    /// Configuration of the master node.
    pub master: MasterSpec,
    /// Configuration of the worker nodes.
    pub worker: WorkerSpec,
    /// Locustfile and library bundles mounted into the pods.
    pub test_files: Option<TestFilesConfig>,
    /// Pod placement rules.
    pub scheduling: Option<SchedulingConfig>,
    /// Environment injected into the Locust containers.
    pub env: Option<EnvConfig>,
    /// Additional volumes made available to the pods.
    pub volumes: Option<Vec<Volume>>,
    /// Mounts of the additional volumes, each targeted at master, worker or both.
    pub volume_mounts: Option<Vec<TargetedVolumeMount>>,
    /// Metrics and tracing settings.
    pub observability: Option<ObservabilityConfig>,
}

/// Master node configuration.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterSpec {
    /// Base command, the operator appends the master flags to it.
    pub command: String,
    /// Resource requests and limits, when any field is set the block is used as is.
    pub resources: Option<ResourceRequirements>,
    /// Extra labels for the master pod.
    pub labels: Option<BTreeMap<String, String>>,
    /// Extra annotations for the master pod.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Start the test as soon as the workers are connected, defaults to true.
    pub autostart: Option<bool>,
    /// Quit the master once the test is over.
    pub autoquit: Option<AutoquitConfig>,
    /// Additional arguments appended after every operator managed flag.
    pub extra_args: Option<Vec<String>>,
}

/// Autoquit behavior of the master.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoquitConfig {
    /// Adds --autoquit to the master command.
    pub enabled: bool,
    /// Seconds to wait after the test ends before quitting, defaults to 60.
    pub timeout: Option<i32>,
}

/// Worker node configuration.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    /// Base command, the operator appends the worker flags to it.
    pub command: String,
    /// Number of worker pods.
    pub replicas: i32,
    /// Resource requests and limits, when any field is set the block is used as is.
    pub resources: Option<ResourceRequirements>,
    /// Extra labels for the worker pods.
    pub labels: Option<BTreeMap<String, String>>,
    /// Extra annotations for the worker pods.
    pub annotations: Option<BTreeMap<String, String>>,
    /// Additional arguments appended after every operator managed flag.
    pub extra_args: Option<Vec<String>>,
}

/// Test file bundles.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestFilesConfig {
    /// Name of the ConfigMap holding the locustfiles.
    pub config_map_ref: Option<String>,
    /// Name of the ConfigMap holding library files.
    pub lib_config_map_ref: Option<String>,
    /// Mount path of the locustfiles, defaults to /lotest/src.
    pub src_mount_path: Option<String>,
    /// Mount path of the library files, defaults to /opt/locust/lib.
    pub lib_mount_path: Option<String>,
}

/// Scheduling configuration.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingConfig {
    /// Affinity rules, only applied when affinity injection is enabled on the operator.
    pub affinity: Option<Affinity>,
    /// Tolerations, only applied when toleration injection is enabled on the operator.
    pub tolerations: Option<Vec<Toleration>>,
    /// Node selector for the pods.
    pub node_selector: Option<BTreeMap<String, String>>,
}

/// Environment injection.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    /// ConfigMaps whose keys are all injected as variables.
    pub config_map_refs: Option<Vec<EnvSourceRef>>,
    /// Secrets whose keys are all injected as variables.
    pub secret_refs: Option<Vec<EnvSourceRef>>,
    /// Individual variables.
    pub variables: Option<Vec<EnvVar>>,
    /// Secrets mounted as files.
    pub secret_mounts: Option<Vec<SecretMount>>,
}

/// A ConfigMap or Secret injected as environment variables.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvSourceRef {
    /// Name of the source object.
    pub name: String,
    /// Prefix prepended to every key.
    pub prefix: Option<String>,
}

/// A Secret mounted as files.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretMount {
    /// Name of the Secret.
    pub name: String,
    /// Directory the Secret is mounted at.
    pub mount_path: String,
    /// Mount the Secret read only.
    #[serde(default)]
    pub read_only: bool,
}

/// Pods that receive a volume mount.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum MountTarget {
    /// Only the master pod.
    Master,
    /// Only the worker pods.
    Worker,
    /// Every pod.
    #[default]
    Both,
}

/// A volume mount with target pod selection.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetedVolumeMount {
    /// The mount itself.
    #[serde(flatten)]
    pub mount: VolumeMount,
    /// Pods receiving the mount.
    #[serde(default)]
    pub target: MountTarget,
}

/// Observability settings.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Native OpenTelemetry export from Locust.
    pub open_telemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry integration.
///
/// When enabled Locust exports through OTLP and the metrics exporter sidecar is not deployed.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenTelemetryConfig {
    /// Adds --otel to the Locust command.
    pub enabled: bool,
    /// Collector endpoint, e.g. otel-collector:4317.
    pub endpoint: Option<String>,
    /// Export protocol, grpc or http/protobuf. Defaults to grpc.
    pub protocol: Option<String>,
    /// Skip TLS verification of the collector.
    #[serde(default)]
    pub insecure: bool,
    /// Additional OTel SDK variables.
    pub extra_env_vars: Option<BTreeMap<String, String>>,
}

/// Lifecycle phase of a load test.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum Phase {
    /// Resources are being created.
    Pending,
    /// The master job is executing.
    Running,
    /// The master job completed.
    Succeeded,
    /// The master job failed.
    Failed,
}

impl Phase {
    /// Reports whether the phase is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Observed state of a load test, written only by the operator.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocustTestStatus {
    /// Current phase, absent until the operator first sees the resource.
    pub phase: Option<Phase>,
    /// Most recent generation processed by the operator.
    #[serde(default)]
    pub observed_generation: i64,
    /// Number of workers expected to connect.
    #[serde(default)]
    pub expected_workers: i32,
    /// Approximate number of connected workers, taken from the active pods of the worker job.
    #[serde(default)]
    pub connected_workers: i32,
    /// When the test started.
    pub start_time: Option<Time>,
    /// When the test completed.
    pub completion_time: Option<Time>,
    /// Latest observations of the test's state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl LocustTest {
    /// Current phase, if the status was initialized.
    pub fn phase(&self) -> Option<Phase> {
        self.status.as_ref().and_then(|status| status.phase)
    }

    /// Reports whether OpenTelemetry export is enabled.
    pub fn otel_enabled(&self) -> bool {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.open_telemetry.as_ref())
            .map(|otel| otel.enabled)
            .unwrap_or(false)
    }
}
