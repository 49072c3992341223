use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::{
    config::OperatorConfig,
    labels::{managed_labels, selector_labels},
    locusttest::{node_name, LocustTest, Role, MASTER_BIND_PORT, MASTER_PORT},
};

/// Name of the metrics port on the master service.
pub const METRICS_PORT_NAME: &str = "prometheus-metrics";

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_owned()),
        port,
        protocol: Some("TCP".to_owned()),
        ..Default::default()
    }
}

/// Service through which the workers reach the master.
///
/// The web UI port is not exposed. The metrics port is only added when the exporter sidecar runs,
/// which is whenever OpenTelemetry is disabled.
pub fn master_service(test: &LocustTest, config: &OperatorConfig) -> Service {
    let name = node_name(&test.name_any(), Role::Master);
    let mut ports = vec![
        tcp_port(&format!("port{MASTER_PORT}"), MASTER_PORT),
        tcp_port(&format!("port{MASTER_BIND_PORT}"), MASTER_BIND_PORT),
    ];
    if !test.otel_enabled() {
        ports.push(tcp_port(METRICS_PORT_NAME, config.metrics_exporter.port));
    }
    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: test.namespace(),
            owner_references: test.controller_owner_ref(&()).map(|oref| vec![oref]),
            labels: managed_labels(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(&name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locusttest::stub::locust_test;

    fn port_names(service: &Service) -> Vec<String> {
        service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .map(|ports| ports.iter().filter_map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn exposes_master_ports_and_metrics() {
        let service = master_service(&locust_test(), &OperatorConfig::default());
        assert_eq!(service.metadata.name.as_deref(), Some("demo-master"));
        assert_eq!(
            port_names(&service),
            vec!["port5557", "port5558", METRICS_PORT_NAME]
        );
        let selector = service.spec.unwrap().selector.unwrap();
        assert_eq!(selector["performance-test-pod-name"], "demo-master");
        let owners = service.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "LocustTest");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn otel_removes_metrics_port() {
        let mut test = locust_test();
        test.spec.observability = Some(crate::locusttest::ObservabilityConfig {
            open_telemetry: Some(crate::locusttest::OpenTelemetryConfig {
                enabled: true,
                ..Default::default()
            }),
        });
        let service = master_service(&test, &OperatorConfig::default());
        assert_eq!(port_names(&service), vec!["port5557", "port5558"]);
    }
}
