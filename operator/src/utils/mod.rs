//! Utils is shared functions and constants for the controller

pub mod retry;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::ObjectReference,
    chrono::{DateTime, Utc},
};
use kube::{
    api::PostParams,
    client::Client,
    runtime::events::{Event, Recorder, Reporter},
    Api, Resource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{config::OperatorConfig, CONTROLLER_NAME};

use self::retry::RetryConfig;

/// Operator Context
pub struct Context<E, C> {
    /// Kube client
    pub k_client: Client,
    /// Publisher of Kubernetes events
    pub events: E,
    /// Clock that provide the current time
    pub clock: C,
    /// Settings read at startup
    pub config: OperatorConfig,
    /// Backoff of status writes that lose a conflict
    pub retry: RetryConfig,
}

impl Context<KubeEventPublisher, UtcClock> {
    /// Create new context
    pub fn new(k_client: Client, config: OperatorConfig) -> Self {
        Context {
            events: KubeEventPublisher::new(k_client.clone()),
            k_client,
            clock: UtcClock,
            config,
            retry: RetryConfig::default(),
        }
    }
}

/// Provides the current time.
pub trait Clock: Send + Sync {
    /// Report the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Provides the current time using real time.
pub struct UtcClock;
impl Clock for UtcClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Publishes events against a Kubernetes object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event about the referenced object.
    async fn publish(&self, reference: &ObjectReference, event: Event) -> Result<(), kube::Error>;
}

/// Publishes events through the events.k8s.io API.
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as the operator.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_owned(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, reference: &ObjectReference, event: Event) -> Result<(), kube::Error> {
        Recorder::new(self.client.clone(), self.reporter.clone(), reference.clone())
            .publish(event)
            .await
    }
}

/// Create an object unless one with the same name already exists.
///
/// Returns whether the object was created. Existing objects are left untouched.
pub async fn create_if_absent<K>(api: &Api<K>, obj: &K) -> Result<bool, kube::Error>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(err)) if err.reason == "AlreadyExists" => Ok(false),
        Err(e) => Err(e),
    }
}
