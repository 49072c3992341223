use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, SecretVolumeSource, Volume, VolumeMount,
};

use crate::locusttest::{LocustTest, MountTarget, Role};

/// Default mount path of the locustfiles.
pub const DEFAULT_SRC_MOUNT_PATH: &str = "/lotest/src";
/// Default mount path of the library files.
pub const DEFAULT_LIB_MOUNT_PATH: &str = "/opt/locust/lib";
/// Name of the volume holding the library files.
pub const LIB_VOLUME_NAME: &str = "locust-lib";

/// Name of the volume a Secret is mounted from.
pub fn secret_volume_name(secret: &str) -> String {
    format!("secret-{secret}")
}

fn applies_to(target: MountTarget, role: Role) -> bool {
    match target {
        MountTarget::Both => true,
        MountTarget::Master => role == Role::Master,
        MountTarget::Worker => role == Role::Worker,
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_owned()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Volumes of a pod of the given role.
///
/// The test file volume is named after the node. User volumes are only kept when a mount
/// targeted at this role references them.
pub fn volumes(test: &LocustTest, role: Role, node_name: &str) -> Vec<Volume> {
    let mut volumes = Vec::new();
    if let Some(files) = &test.spec.test_files {
        if let Some(config_map) = non_empty(&files.config_map_ref) {
            volumes.push(config_map_volume(node_name, config_map));
        }
        if let Some(config_map) = non_empty(&files.lib_config_map_ref) {
            volumes.push(config_map_volume(LIB_VOLUME_NAME, config_map));
        }
    }
    if let Some(mounts) = test.spec.env.as_ref().and_then(|e| e.secret_mounts.as_ref()) {
        volumes.extend(mounts.iter().map(|mount| Volume {
            name: secret_volume_name(&mount.name),
            secret: Some(SecretVolumeSource {
                secret_name: Some(mount.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }));
    }
    if let Some(user_volumes) = &test.spec.volumes {
        let mounts = test.spec.volume_mounts.as_deref().unwrap_or_default();
        volumes.extend(
            user_volumes
                .iter()
                .filter(|volume| {
                    mounts.iter().any(|mount| {
                        mount.mount.name == volume.name && applies_to(mount.target, role)
                    })
                })
                .cloned(),
        );
    }
    volumes
}

/// Mounts of the main Locust container of the given role.
pub fn volume_mounts(test: &LocustTest, role: Role, node_name: &str) -> Vec<VolumeMount> {
    let mut mounts = Vec::new();
    if let Some(files) = &test.spec.test_files {
        if non_empty(&files.config_map_ref).is_some() {
            mounts.push(VolumeMount {
                name: node_name.to_owned(),
                mount_path: non_empty(&files.src_mount_path)
                    .unwrap_or(DEFAULT_SRC_MOUNT_PATH)
                    .to_owned(),
                ..Default::default()
            });
        }
        if non_empty(&files.lib_config_map_ref).is_some() {
            mounts.push(VolumeMount {
                name: LIB_VOLUME_NAME.to_owned(),
                mount_path: non_empty(&files.lib_mount_path)
                    .unwrap_or(DEFAULT_LIB_MOUNT_PATH)
                    .to_owned(),
                ..Default::default()
            });
        }
    }
    if let Some(secret_mounts) = test.spec.env.as_ref().and_then(|e| e.secret_mounts.as_ref()) {
        mounts.extend(secret_mounts.iter().map(|mount| VolumeMount {
            name: secret_volume_name(&mount.name),
            mount_path: mount.mount_path.clone(),
            read_only: Some(mount.read_only),
            ..Default::default()
        }));
    }
    if let Some(user_mounts) = &test.spec.volume_mounts {
        mounts.extend(
            user_mounts
                .iter()
                .filter(|mount| applies_to(mount.target, role))
                .map(|mount| mount.mount.clone()),
        );
    }
    mounts
}
