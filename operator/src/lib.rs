//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Settings read from the environment at startup.
#[cfg(feature = "controller")]
pub mod config;
/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// LocustTest CRD and its controller.
pub mod locusttest;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

/// Name the operator reports itself as.
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "locust-k8s-operator";
