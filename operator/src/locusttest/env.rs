use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, EnvFromSource, EnvVar, SecretEnvSource,
};

use crate::{config::KafkaConfig, locusttest::LocustTest};

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn kafka_env_vars(kafka: &KafkaConfig) -> Vec<EnvVar> {
    vec![
        env_var("KAFKA_BOOTSTRAP_SERVERS", &kafka.bootstrap_servers),
        env_var("KAFKA_SECURITY_ENABLED", kafka.security_enabled.to_string()),
        env_var("KAFKA_SECURITY_PROTOCOL_CONFIG", &kafka.security_protocol),
        env_var("KAFKA_SASL_MECHANISM", &kafka.sasl_mechanism),
        env_var("KAFKA_SASL_JAAS_CONFIG", &kafka.sasl_jaas_config),
        env_var("KAFKA_USERNAME", &kafka.username),
        env_var("KAFKA_PASSWORD", &kafka.password),
    ]
}

/// OTLP exporter settings for the Locust process, empty unless OpenTelemetry is enabled.
pub fn otel_env_vars(test: &LocustTest) -> Vec<EnvVar> {
    let Some(otel) = test
        .spec
        .observability
        .as_ref()
        .and_then(|o| o.open_telemetry.as_ref())
        .filter(|otel| otel.enabled)
    else {
        return Vec::new();
    };

    let mut env = vec![
        env_var("OTEL_TRACES_EXPORTER", "otlp"),
        env_var("OTEL_METRICS_EXPORTER", "otlp"),
    ];
    if let Some(endpoint) = otel.endpoint.as_ref().filter(|e| !e.is_empty()) {
        env.push(env_var("OTEL_EXPORTER_OTLP_ENDPOINT", endpoint));
    }
    let protocol = otel
        .protocol
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or("grpc");
    env.push(env_var("OTEL_EXPORTER_OTLP_PROTOCOL", protocol));
    if otel.insecure {
        env.push(env_var("OTEL_EXPORTER_OTLP_INSECURE", "true"));
    }
    // BTreeMap iteration keeps the extra variables sorted.
    if let Some(extra) = &otel.extra_env_vars {
        env.extend(extra.iter().map(|(name, value)| env_var(name, value)));
    }
    env
}

/// Variables of the Locust container: Kafka settings, then OpenTelemetry, then the user's own.
pub fn env_vars(test: &LocustTest, kafka: &KafkaConfig) -> Vec<EnvVar> {
    let mut env = kafka_env_vars(kafka);
    env.extend(otel_env_vars(test));
    if let Some(variables) = test.spec.env.as_ref().and_then(|e| e.variables.as_ref()) {
        env.extend(variables.iter().cloned());
    }
    env
}

/// ConfigMaps and Secrets injected wholesale, ConfigMaps first.
pub fn env_from(test: &LocustTest) -> Option<Vec<EnvFromSource>> {
    let env = test.spec.env.as_ref()?;
    let config_maps = env.config_map_refs.iter().flatten().map(|r| EnvFromSource {
        prefix: r.prefix.clone(),
        config_map_ref: Some(ConfigMapEnvSource {
            name: Some(r.name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    });
    let secrets = env.secret_refs.iter().flatten().map(|r| EnvFromSource {
        prefix: r.prefix.clone(),
        secret_ref: Some(SecretEnvSource {
            name: Some(r.name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    });
    let sources: Vec<EnvFromSource> = config_maps.chain(secrets).collect();
    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}
