//! Place all LocustTest related logic under this mod.
/// Command line assembly for the Locust containers.
#[cfg(feature = "controller")]
pub mod command;
/// Controller for the LocustTest CRD.
#[cfg(feature = "controller")]
pub mod controller;
/// Environment of the Locust containers.
#[cfg(feature = "controller")]
pub mod env;
/// Pod health analysis.
#[cfg(feature = "controller")]
pub mod health;
/// Jobs running the master and the workers.
#[cfg(feature = "controller")]
pub mod job;
/// Effective container resources.
#[cfg(feature = "controller")]
pub mod resources;
/// Service exposing the master.
#[cfg(feature = "controller")]
pub mod service;
/// CRD types.
pub mod spec;
/// Status conditions and phase transitions.
#[cfg(feature = "controller")]
pub mod status;
/// Volumes and mounts of the pods.
#[cfg(feature = "controller")]
pub mod volumes;

#[cfg(test)]
#[cfg(feature = "controller")]
pub mod stub;

pub use spec::*;

/// Port the master listens on for workers.
pub const MASTER_PORT: i32 = 5557;
/// Second port of the master.
pub const MASTER_BIND_PORT: i32 = 5558;
/// Port of the Locust web UI, never exposed through the service.
pub const WEB_UI_PORT: i32 = 8089;
/// Port exposed by the workers.
pub const WORKER_PORT: i32 = 8080;

/// Role of a Locust node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single master coordinating the test.
    Master,
    /// One of the workers generating load.
    Worker,
}

impl Role {
    /// Lower case name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Worker => "worker",
        }
    }
}

/// Name of the node of a role, shared by its Job, its main container and the master service.
pub fn node_name(test_name: &str, role: Role) -> String {
    format!("{test_name}-{}", role.as_str()).replace('.', "-")
}
