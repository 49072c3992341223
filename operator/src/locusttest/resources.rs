//! Resolves the effective resources of the Locust containers.
//!
//! A resource block declared on the LocustTest wins as a whole. Without one, every quantity falls
//! back independently from the role specific operator setting to the pod wide default.
use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};

use crate::{
    config::{OperatorConfig, ResourceQuantities},
    locusttest::Role,
};

/// Effective resources of the main container of a role.
pub fn resolve_resources(
    role: Role,
    declared: Option<&ResourceRequirements>,
    config: &OperatorConfig,
) -> ResourceRequirements {
    if let Some(declared) = declared.filter(|declared| declares_any(declared)) {
        return declared.clone();
    }
    let role_specific = match role {
        Role::Master => &config.master_resources,
        Role::Worker => &config.worker_resources,
    };
    ResourceRequirements::from(&merge(role_specific, &config.pod_resources))
}

/// Per field fallback from `preferred` to `fallback`.
fn merge(preferred: &ResourceQuantities, fallback: &ResourceQuantities) -> ResourceQuantities {
    let pick = |preferred: &String, fallback: &String| {
        if preferred.is_empty() {
            fallback.to_owned()
        } else {
            preferred.to_owned()
        }
    };
    ResourceQuantities {
        cpu_request: pick(&preferred.cpu_request, &fallback.cpu_request),
        mem_request: pick(&preferred.mem_request, &fallback.mem_request),
        ephemeral_request: pick(&preferred.ephemeral_request, &fallback.ephemeral_request),
        cpu_limit: pick(&preferred.cpu_limit, &fallback.cpu_limit),
        mem_limit: pick(&preferred.mem_limit, &fallback.mem_limit),
        ephemeral_limit: pick(&preferred.ephemeral_limit, &fallback.ephemeral_limit),
    }
}

fn declares_any(resources: &ResourceRequirements) -> bool {
    let non_empty = |list: &Option<BTreeMap<String, Quantity>>| {
        list.as_ref().map_or(false, |list| !list.is_empty())
    };
    non_empty(&resources.requests) || non_empty(&resources.limits)
}

fn resource_list(cpu: &str, memory: &str, ephemeral: &str) -> Option<BTreeMap<String, Quantity>> {
    let list: BTreeMap<String, Quantity> = [
        ("cpu", cpu),
        ("memory", memory),
        ("ephemeral-storage", ephemeral),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| (name.to_owned(), Quantity(value.to_owned())))
    .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

impl From<&ResourceQuantities> for ResourceRequirements {
    fn from(value: &ResourceQuantities) -> Self {
        ResourceRequirements {
            requests: resource_list(
                &value.cpu_request,
                &value.mem_request,
                &value.ephemeral_request,
            ),
            limits: resource_list(&value.cpu_limit, &value.mem_limit, &value.ephemeral_limit),
            ..Default::default()
        }
    }
}
