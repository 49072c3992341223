//! Operator configuration, read once at process start.
use anyhow::{anyhow, Result};
use clap::Args;
use once_cell::sync::Lazy;
use regex::Regex;

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)(([KMGTPE]i)|[numkMGTPE]|[eE][+-]?\d+)?$")
        .expect("quantity pattern should compile")
});

/// Command line and environment settings of the operator.
///
/// Every field can be given as a long flag or through the environment variable named next to it.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Default CPU request of every Locust pod.
    #[arg(long, env = "POD_CPU_REQUEST", default_value = "250m")]
    pub pod_cpu_request: String,
    /// Default memory request of every Locust pod.
    #[arg(long, env = "POD_MEM_REQUEST", default_value = "128Mi")]
    pub pod_mem_request: String,
    /// Default ephemeral storage request of every Locust pod.
    #[arg(long, env = "POD_EPHEMERAL_REQUEST", default_value = "30M")]
    pub pod_ephemeral_request: String,
    /// Default CPU limit of every Locust pod.
    #[arg(long, env = "POD_CPU_LIMIT", default_value = "1000m")]
    pub pod_cpu_limit: String,
    /// Default memory limit of every Locust pod.
    #[arg(long, env = "POD_MEM_LIMIT", default_value = "1024Mi")]
    pub pod_mem_limit: String,
    /// Default ephemeral storage limit of every Locust pod.
    #[arg(long, env = "POD_EPHEMERAL_LIMIT", default_value = "50M")]
    pub pod_ephemeral_limit: String,

    /// CPU request of the master pod.
    #[arg(long, env = "MASTER_POD_CPU_REQUEST")]
    pub master_pod_cpu_request: Option<String>,
    /// Memory request of the master pod.
    #[arg(long, env = "MASTER_POD_MEM_REQUEST")]
    pub master_pod_mem_request: Option<String>,
    /// Ephemeral storage request of the master pod.
    #[arg(long, env = "MASTER_POD_EPHEMERAL_REQUEST")]
    pub master_pod_ephemeral_request: Option<String>,
    /// CPU limit of the master pod.
    #[arg(long, env = "MASTER_POD_CPU_LIMIT")]
    pub master_pod_cpu_limit: Option<String>,
    /// Memory limit of the master pod.
    #[arg(long, env = "MASTER_POD_MEM_LIMIT")]
    pub master_pod_mem_limit: Option<String>,
    /// Ephemeral storage limit of the master pod.
    #[arg(long, env = "MASTER_POD_EPHEMERAL_LIMIT")]
    pub master_pod_ephemeral_limit: Option<String>,

    /// CPU request of the worker pods.
    #[arg(long, env = "WORKER_POD_CPU_REQUEST")]
    pub worker_pod_cpu_request: Option<String>,
    /// Memory request of the worker pods.
    #[arg(long, env = "WORKER_POD_MEM_REQUEST")]
    pub worker_pod_mem_request: Option<String>,
    /// Ephemeral storage request of the worker pods.
    #[arg(long, env = "WORKER_POD_EPHEMERAL_REQUEST")]
    pub worker_pod_ephemeral_request: Option<String>,
    /// CPU limit of the worker pods.
    #[arg(long, env = "WORKER_POD_CPU_LIMIT")]
    pub worker_pod_cpu_limit: Option<String>,
    /// Memory limit of the worker pods.
    #[arg(long, env = "WORKER_POD_MEM_LIMIT")]
    pub worker_pod_mem_limit: Option<String>,
    /// Ephemeral storage limit of the worker pods.
    #[arg(long, env = "WORKER_POD_EPHEMERAL_LIMIT")]
    pub worker_pod_ephemeral_limit: Option<String>,

    /// Image of the metrics exporter sidecar.
    #[arg(
        long,
        env = "METRICS_EXPORTER_IMAGE",
        default_value = "containersol/locust_exporter:v0.5.0"
    )]
    pub metrics_exporter_image: String,
    /// Port the metrics exporter listens on.
    #[arg(long, env = "METRICS_EXPORTER_PORT", default_value_t = 9646)]
    pub metrics_exporter_port: i32,
    /// Pull policy of the metrics exporter image.
    #[arg(long, env = "METRICS_EXPORTER_IMAGE_PULL_POLICY", default_value = "Always")]
    pub metrics_exporter_image_pull_policy: String,
    /// CPU request of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_CPU_REQUEST", default_value = "250m")]
    pub metrics_exporter_cpu_request: String,
    /// Memory request of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_MEM_REQUEST", default_value = "128Mi")]
    pub metrics_exporter_mem_request: String,
    /// Ephemeral storage request of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_EPHEMERAL_REQUEST", default_value = "30M")]
    pub metrics_exporter_ephemeral_request: String,
    /// CPU limit of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_CPU_LIMIT", default_value = "1000m")]
    pub metrics_exporter_cpu_limit: String,
    /// Memory limit of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_MEM_LIMIT", default_value = "1024Mi")]
    pub metrics_exporter_mem_limit: String,
    /// Ephemeral storage limit of the metrics exporter.
    #[arg(long, env = "METRICS_EXPORTER_EPHEMERAL_LIMIT", default_value = "50M")]
    pub metrics_exporter_ephemeral_limit: String,

    /// Seconds a finished job is kept before it is garbage collected.
    #[arg(long, env = "JOB_TTL_SECONDS_AFTER_FINISHED")]
    pub job_ttl_seconds_after_finished: Option<i32>,
    /// Apply the affinity declared on a LocustTest to its pods.
    #[arg(long, env = "ENABLE_AFFINITY_CR_INJECTION", default_value_t = false, action = clap::ArgAction::Set)]
    pub enable_affinity_cr_injection: bool,
    /// Apply the tolerations declared on a LocustTest to its pods.
    #[arg(long, env = "ENABLE_TAINT_TOLERATIONS_CR_INJECTION", default_value_t = false, action = clap::ArgAction::Set)]
    pub enable_taint_tolerations_cr_injection: bool,

    /// Kafka bootstrap servers passed to the Locust containers.
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    pub kafka_bootstrap_servers: String,
    /// Whether Kafka requires authentication.
    #[arg(long, env = "KAFKA_SECURITY_ENABLED", default_value_t = false, action = clap::ArgAction::Set)]
    pub kafka_security_enabled: bool,
    /// Kafka security protocol.
    #[arg(long, env = "KAFKA_SECURITY_PROTOCOL_CONFIG", default_value = "SASL_PLAINTEXT")]
    pub kafka_security_protocol: String,
    /// Kafka SASL mechanism.
    #[arg(long, env = "KAFKA_SASL_MECHANISM", default_value = "SCRAM-SHA-512")]
    pub kafka_sasl_mechanism: String,
    /// Kafka SASL JAAS configuration.
    #[arg(long, env = "KAFKA_SASL_JAAS_CONFIG", default_value = "")]
    pub kafka_sasl_jaas_config: String,
    /// Kafka user name.
    #[arg(long, env = "KAFKA_USERNAME", default_value = "")]
    pub kafka_username: String,
    /// Kafka password.
    #[arg(long, env = "KAFKA_PASSWORD", default_value = "", hide_env_values = true)]
    pub kafka_password: String,
}

/// Six resource quantities, an empty string means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// CPU request.
    pub cpu_request: String,
    /// Memory request.
    pub mem_request: String,
    /// Ephemeral storage request.
    pub ephemeral_request: String,
    /// CPU limit.
    pub cpu_limit: String,
    /// Memory limit.
    pub mem_limit: String,
    /// Ephemeral storage limit.
    pub ephemeral_limit: String,
}

impl ResourceQuantities {
    fn fields(&self) -> [(&'static str, &str); 6] {
        [
            ("cpu request", &self.cpu_request),
            ("memory request", &self.mem_request),
            ("ephemeral storage request", &self.ephemeral_request),
            ("cpu limit", &self.cpu_limit),
            ("memory limit", &self.mem_limit),
            ("ephemeral storage limit", &self.ephemeral_limit),
        ]
    }

    fn validate(&self, scope: &str) -> Result<()> {
        for (field, value) in self.fields() {
            if !value.is_empty() && !is_valid_quantity(value) {
                return Err(anyhow!("invalid {scope} {field} quantity: {value:?}"));
            }
        }
        Ok(())
    }
}

/// Metrics exporter sidecar settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsExporterConfig {
    /// Image of the sidecar.
    pub image: String,
    /// Listen port of the sidecar.
    pub port: i32,
    /// Pull policy of the image.
    pub image_pull_policy: String,
    /// Resources of the sidecar.
    pub resources: ResourceQuantities,
}

/// Kafka connection settings exposed to the Locust containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Bootstrap servers.
    pub bootstrap_servers: String,
    /// Whether authentication is enabled.
    pub security_enabled: bool,
    /// Security protocol.
    pub security_protocol: String,
    /// SASL mechanism.
    pub sasl_mechanism: String,
    /// SASL JAAS configuration.
    pub sasl_jaas_config: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// Validated operator configuration shared by every reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Defaults applied to every Locust pod.
    pub pod_resources: ResourceQuantities,
    /// Master specific values, take precedence over the pod defaults.
    pub master_resources: ResourceQuantities,
    /// Worker specific values, take precedence over the pod defaults.
    pub worker_resources: ResourceQuantities,
    /// Metrics exporter sidecar.
    pub metrics_exporter: MetricsExporterConfig,
    /// TTL of finished jobs.
    pub job_ttl_seconds_after_finished: Option<i32>,
    /// Inject the affinity declared on a LocustTest.
    pub enable_affinity_injection: bool,
    /// Inject the tolerations declared on a LocustTest.
    pub enable_tolerations_injection: bool,
    /// Kafka connection settings.
    pub kafka: KafkaConfig,
}

impl TryFrom<ConfigArgs> for OperatorConfig {
    type Error = anyhow::Error;

    fn try_from(args: ConfigArgs) -> Result<Self> {
        let config = Self {
            pod_resources: ResourceQuantities {
                cpu_request: args.pod_cpu_request,
                mem_request: args.pod_mem_request,
                ephemeral_request: args.pod_ephemeral_request,
                cpu_limit: args.pod_cpu_limit,
                mem_limit: args.pod_mem_limit,
                ephemeral_limit: args.pod_ephemeral_limit,
            },
            master_resources: ResourceQuantities {
                cpu_request: args.master_pod_cpu_request.unwrap_or_default(),
                mem_request: args.master_pod_mem_request.unwrap_or_default(),
                ephemeral_request: args.master_pod_ephemeral_request.unwrap_or_default(),
                cpu_limit: args.master_pod_cpu_limit.unwrap_or_default(),
                mem_limit: args.master_pod_mem_limit.unwrap_or_default(),
                ephemeral_limit: args.master_pod_ephemeral_limit.unwrap_or_default(),
            },
            worker_resources: ResourceQuantities {
                cpu_request: args.worker_pod_cpu_request.unwrap_or_default(),
                mem_request: args.worker_pod_mem_request.unwrap_or_default(),
                ephemeral_request: args.worker_pod_ephemeral_request.unwrap_or_default(),
                cpu_limit: args.worker_pod_cpu_limit.unwrap_or_default(),
                mem_limit: args.worker_pod_mem_limit.unwrap_or_default(),
                ephemeral_limit: args.worker_pod_ephemeral_limit.unwrap_or_default(),
            },
            metrics_exporter: MetricsExporterConfig {
                image: args.metrics_exporter_image,
                port: args.metrics_exporter_port,
                image_pull_policy: args.metrics_exporter_image_pull_policy,
                resources: ResourceQuantities {
                    cpu_request: args.metrics_exporter_cpu_request,
                    mem_request: args.metrics_exporter_mem_request,
                    ephemeral_request: args.metrics_exporter_ephemeral_request,
                    cpu_limit: args.metrics_exporter_cpu_limit,
                    mem_limit: args.metrics_exporter_mem_limit,
                    ephemeral_limit: args.metrics_exporter_ephemeral_limit,
                },
            },
            job_ttl_seconds_after_finished: args.job_ttl_seconds_after_finished,
            enable_affinity_injection: args.enable_affinity_cr_injection,
            enable_tolerations_injection: args.enable_taint_tolerations_cr_injection,
            kafka: KafkaConfig {
                bootstrap_servers: args.kafka_bootstrap_servers,
                security_enabled: args.kafka_security_enabled,
                security_protocol: args.kafka_security_protocol,
                sasl_mechanism: args.kafka_sasl_mechanism,
                sasl_jaas_config: args.kafka_sasl_jaas_config,
                username: args.kafka_username,
                password: args.kafka_password,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

impl OperatorConfig {
    fn validate(&self) -> Result<()> {
        self.pod_resources.validate("pod")?;
        self.master_resources.validate("master pod")?;
        self.worker_resources.validate("worker pod")?;
        self.metrics_exporter.resources.validate("metrics exporter")?;
        if !(1..=65535).contains(&self.metrics_exporter.port) {
            return Err(anyhow!(
                "invalid metrics exporter port: {}",
                self.metrics_exporter.port
            ));
        }
        Ok(())
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let pod_resources = ResourceQuantities {
            cpu_request: "250m".to_owned(),
            mem_request: "128Mi".to_owned(),
            ephemeral_request: "30M".to_owned(),
            cpu_limit: "1000m".to_owned(),
            mem_limit: "1024Mi".to_owned(),
            ephemeral_limit: "50M".to_owned(),
        };
        Self {
            metrics_exporter: MetricsExporterConfig {
                image: "containersol/locust_exporter:v0.5.0".to_owned(),
                port: 9646,
                image_pull_policy: "Always".to_owned(),
                resources: pod_resources.clone(),
            },
            pod_resources,
            master_resources: ResourceQuantities::default(),
            worker_resources: ResourceQuantities::default(),
            job_ttl_seconds_after_finished: None,
            enable_affinity_injection: false,
            enable_tolerations_injection: false,
            kafka: KafkaConfig {
                bootstrap_servers: "localhost:9092".to_owned(),
                security_enabled: false,
                security_protocol: "SASL_PLAINTEXT".to_owned(),
                sasl_mechanism: "SCRAM-SHA-512".to_owned(),
                sasl_jaas_config: String::new(),
                username: String::new(),
                password: String::new(),
            },
        }
    }
}

/// Reports whether the value is a valid Kubernetes resource quantity.
pub fn is_valid_quantity(value: &str) -> bool {
    QUANTITY.is_match(value)
}
