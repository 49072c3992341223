//! Explains why the pods of a LocustTest are unhealthy.
use std::time::Duration;

use k8s_openapi::{
    api::core::v1::{ContainerStatus, Pod},
    chrono::{DateTime, Utc},
};
use kube::{api::ListParams, Api, Client, ResourceExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::{labels::test_name_selector, locusttest::LocustTest};

/// Pod failures are tolerated this long after the oldest pod was created.
pub const GRACE_PERIOD: Duration = Duration::from_secs(120);

/// Reason reported while pods are being created or within the grace period.
pub const REASON_PODS_STARTING: &str = "PodsStarting";
/// Reason reported when no pod is failing.
pub const REASON_PODS_HEALTHY: &str = "PodsHealthy";

static CONFIG_MAP_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[Cc]onfig[Mm]ap\s+"([^"]+)""#).expect("config map pattern should compile")
});

/// Kind of pod failure, ordered from most to least important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureType {
    /// A referenced ConfigMap or Secret is missing.
    ConfigurationError,
    /// The image cannot be pulled.
    ImagePullError,
    /// The pod cannot be placed on a node.
    SchedulingError,
    /// A main container keeps failing.
    CrashLoopBackOff,
    /// An init container failed.
    InitializationError,
}

impl FailureType {
    /// Condition reason of the failure.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::ConfigurationError => "ConfigurationError",
            FailureType::ImagePullError => "ImagePullError",
            FailureType::SchedulingError => "SchedulingError",
            FailureType::CrashLoopBackOff => "CrashLoopBackOff",
            FailureType::InitializationError => "InitializationError",
        }
    }
}

/// A single failing pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodFailureInfo {
    /// Name of the pod.
    pub name: String,
    /// What went wrong.
    pub failure_type: FailureType,
    /// Message reported by Kubernetes, possibly enriched.
    pub error_message: String,
}

/// Health verdict over all pods of a test. Recomputed on every reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHealthStatus {
    /// False when at least one pod failed after the grace period.
    pub healthy: bool,
    /// Condition reason.
    pub reason: String,
    /// Human readable summary.
    pub message: String,
    /// Failing pods of the highest priority failure type.
    pub failed_pods: Vec<PodFailureInfo>,
    /// True while the pods are younger than the grace period.
    pub in_grace_period: bool,
    /// Remaining grace period, the reconcile should run again after it.
    pub requeue_after: Option<Duration>,
}

impl PodHealthStatus {
    fn healthy(reason: &str, message: &str) -> Self {
        Self {
            healthy: true,
            reason: reason.to_owned(),
            message: message.to_owned(),
            failed_pods: Vec::new(),
            in_grace_period: false,
            requeue_after: None,
        }
    }
}

/// List the pods of a test and analyze them.
///
/// A failure to list the pods is reported as healthy, the state machine must not stall on it.
pub async fn check_pod_health(
    client: Client,
    test: &LocustTest,
    now: DateTime<Utc>,
) -> PodHealthStatus {
    let Some(ns) = test.namespace() else {
        return PodHealthStatus::healthy(REASON_PODS_HEALTHY, "Pod health check pending");
    };
    let pods: Api<Pod> = Api::namespaced(client, &ns);
    let params = ListParams::default().labels(&test_name_selector(&test.name_any()));
    match pods.list(&params).await {
        Ok(list) => analyze_pods(test, &list.items, now),
        Err(err) => {
            warn!(?err, test = %test.name_any(), "failed to list pods for health check");
            PodHealthStatus::healthy(REASON_PODS_HEALTHY, "Pod health check pending")
        }
    }
}

/// Classify the pods of a test into a single verdict.
pub fn analyze_pods(test: &LocustTest, pods: &[Pod], now: DateTime<Utc>) -> PodHealthStatus {
    if pods.is_empty() {
        return PodHealthStatus::healthy(REASON_PODS_STARTING, "Waiting for pods to be created");
    }

    let oldest = pods
        .iter()
        .filter_map(|pod| pod.metadata.creation_timestamp.as_ref())
        .map(|time| time.0)
        .min();
    if let Some(oldest) = oldest {
        let age = (now - oldest).to_std().unwrap_or_default();
        if age < GRACE_PERIOD {
            let remaining = GRACE_PERIOD - age;
            debug!(?remaining, "pods in startup grace period");
            return PodHealthStatus {
                in_grace_period: true,
                requeue_after: Some(remaining),
                ..PodHealthStatus::healthy(REASON_PODS_STARTING, "Pods are starting up")
            };
        }
    }

    let failures: Vec<PodFailureInfo> = pods
        .iter()
        .filter_map(|pod| analyze_pod(pod, test))
        .collect();
    let Some(primary) = failures.iter().map(|f| f.failure_type).min() else {
        return PodHealthStatus::healthy(REASON_PODS_HEALTHY, "All pods are healthy");
    };
    let failed_pods: Vec<PodFailureInfo> = failures
        .into_iter()
        .filter(|f| f.failure_type == primary)
        .collect();

    let names: Vec<&str> = failed_pods.iter().map(|f| f.name.as_str()).collect();
    let mut message = format!(
        "{}: {} pod(s) affected [{}]: {}",
        primary.as_str(),
        failed_pods.len(),
        names.join(", "),
        failed_pods[0].error_message,
    );
    if primary == FailureType::ConfigurationError {
        message.push_str(". Create the ConfigMap and the pods will restart automatically.");
    }

    PodHealthStatus {
        healthy: false,
        reason: primary.as_str().to_owned(),
        message,
        failed_pods,
        in_grace_period: false,
        requeue_after: None,
    }
}

fn analyze_pod(pod: &Pod, test: &LocustTest) -> Option<PodFailureInfo> {
    let name = pod.name_any();
    let status = pod.status.as_ref()?;

    let unschedulable = status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False");
    if let Some(condition) = unschedulable {
        return Some(PodFailureInfo {
            name,
            failure_type: FailureType::SchedulingError,
            error_message: condition.message.clone().unwrap_or_default(),
        });
    }

    let init = status.init_container_statuses.iter().flatten().map(|s| (s, true));
    let main = status.container_statuses.iter().flatten().map(|s| (s, false));
    init.chain(main).find_map(|(container, is_init)| {
        analyze_container(container, is_init, test).map(|(failure_type, error_message)| {
            PodFailureInfo {
                name: name.clone(),
                failure_type,
                error_message,
            }
        })
    })
}

fn analyze_container(
    container: &ContainerStatus,
    is_init: bool,
    test: &LocustTest,
) -> Option<(FailureType, String)> {
    let state = container.state.as_ref()?;
    if let Some(waiting) = &state.waiting {
        let reason = waiting.reason.as_deref().unwrap_or_default();
        let message = waiting.message.clone().unwrap_or_default();
        if reason == "CreateContainerConfigError" {
            return Some((
                FailureType::ConfigurationError,
                config_map_error(&message, test),
            ));
        }
        if reason.contains("ImagePull") {
            return Some((FailureType::ImagePullError, message));
        }
        if reason == "CrashLoopBackOff" {
            return Some((FailureType::CrashLoopBackOff, message));
        }
    }
    if let Some(terminated) = state.terminated.as_ref().filter(|t| t.exit_code != 0) {
        let failure_type = if is_init {
            FailureType::InitializationError
        } else {
            FailureType::CrashLoopBackOff
        };
        return Some((
            failure_type,
            format!(
                "Container {} exited with code {}: {}",
                container.name,
                terminated.exit_code,
                terminated.reason.as_deref().unwrap_or_default()
            ),
        ));
    }
    None
}

/// Point at the ConfigMap the test expects when the error is about it.
fn config_map_error(message: &str, test: &LocustTest) -> String {
    let expected = test.spec.test_files.as_ref().and_then(|files| {
        files
            .config_map_ref
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| files.lib_config_map_ref.as_deref().filter(|name| !name.is_empty()))
    });
    let Some(expected) = expected else {
        return message.to_owned();
    };
    match CONFIG_MAP_NAME.captures(message).and_then(|c| c.get(1)) {
        Some(found) if found.as_str() != expected => message.to_owned(),
        _ => format!("ConfigMap not found (expected: {expected}). {message}"),
    }
}
