//! Lifecycle of a single LocalStack container.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Instance                                │
//! │                                                                      │
//! │   start(services)                                                    │
//! │         │                                                            │
//! │         ▼                                                            │
//! │   ┌──────────────┐     ┌──────────────┐     ┌────────────────────┐   │
//! │   │ Stop running │────▶│ Build / Pull │────▶│ Create & Start     │   │
//! │   │ (if any)     │     │ Image        │     │ Container          │   │
//! │   └──────────────┘     └──────────────┘     └────────────────────┘   │
//! │                                                     │                │
//! │                                                     ▼                │
//! │   ┌──────────────┐     ┌──────────────┐     ┌────────────────────┐   │
//! │   │ Publish      │◀────│ Poll Probe   │◀────│ Poll Inspect for   │   │
//! │   │ Endpoints    │     │ (DynamoDB)   │     │ Host Ports         │   │
//! │   └──────────────┘     └──────────────┘     └────────────────────┘   │
//! │                                                                      │
//! │   The container vanishing mid-wait restarts the sequence at the      │
//! │   image step, a bounded number of times.                             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The instance moves through [`InstanceState`]: `Cold` until a start
//! begins, `Starting` while the container comes up, `Running` once the
//! endpoints are published and `Stopping` while a stop is in flight.
//! Lookups answer with an empty string in every state but `Running`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use localstack_harness::{Instance, service};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> localstack_harness::Result<()> {
//! let instance = Arc::new(Instance::builder().version("latest").build()?);
//! let cancel = CancellationToken::new();
//!
//! instance
//!     .start_with_cancellation(cancel.clone(), &[service::SQS])
//!     .await?;
//! println!("SQS at {}", instance.endpoint_v2(service::SQS));
//!
//! // Stops the container in the background.
//! cancel.cancel();
//! # Ok(())
//! # }
//! ```

mod builder;
mod lifecycle;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

use crate::docker::ContainerEngine;
use crate::endpoints::EndpointDirectory;
use crate::error::Result;
use crate::probe::ReadinessProbe;
use crate::service::Service;
use crate::version::VersionPolicy;

pub use builder::{DEFAULT_TIMEOUT, ImageSource, InstanceBuilder, LifecycleSettings};

/// Host name under which published ports are reachable.
pub const ENDPOINT_HOST: &str = "localhost";

/// Scheme prefixed by [`Instance::endpoint_v2`].
pub const ENDPOINT_SCHEME: &str = "http://";

/// Where an [`Instance`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// No container, or one left over from a failed start.
    Cold,
    /// A start is in progress.
    Starting,
    /// Ready; endpoints are published.
    Running,
    /// A stop is in progress.
    Stopping,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Cold => write!(f, "cold"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Handle owning one LocalStack container at a time.
///
/// Cheap to share behind an `Arc`; endpoint lookups are synchronous and may
/// run concurrently with each other. Start calls on the same instance must
/// be serialized by the caller.
pub struct Instance {
    engine: Arc<dyn ContainerEngine>,
    probe: Arc<dyn ReadinessProbe>,
    version: String,
    fixed_port: bool,
    labels: HashMap<String, String>,
    timeout: Duration,
    image_source: ImageSource,
    dispatch: Option<Dispatch>,
    settings: LifecycleSettings,
    state: RwLock<InstanceState>,
    container_id: RwLock<Option<String>>,
    endpoints: EndpointDirectory,
    /// Retires the stop watcher of the previous cancellable start.
    watcher_shutdown: Mutex<CancellationToken>,
}

impl Instance {
    /// Instance for the latest LocalStack on the local Docker daemon.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn ReadinessProbe>,
        policy: VersionPolicy,
        labels: HashMap<String, String>,
        timeout: Duration,
        image_source: ImageSource,
        dispatch: Option<Dispatch>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            engine,
            probe,
            version: policy.version,
            fixed_port: policy.fixed_port,
            labels,
            timeout,
            image_source,
            dispatch,
            settings,
            state: RwLock::new(InstanceState::Cold),
            container_id: RwLock::new(None),
            endpoints: EndpointDirectory::new(),
            watcher_shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Start LocalStack and wait until it answers.
    ///
    /// Restricts the started services to `services` (plus the probe
    /// service) when non-empty. A running container is stopped first.
    pub async fn start(&self, services: &[Service]) -> Result<()> {
        self.retire_watcher();
        self.traced(self.run_start(&CancellationToken::new(), services))
            .await
    }

    /// Like [`start`](Self::start), but bound to `cancel`.
    ///
    /// Once `cancel` fires, a background task stops the container, and a
    /// start still waiting returns [`Cancelled`](crate::LocalstackError::Cancelled).
    /// The background task ends with the next start or when the instance
    /// is dropped.
    pub async fn start_with_cancellation(
        self: &Arc<Self>,
        cancel: CancellationToken,
        services: &[Service],
    ) -> Result<()> {
        self.spawn_stop_watcher(cancel.clone());
        self.traced(self.run_start_bound(&cancel, services)).await
    }

    /// Stop the container. A no-op when nothing is running.
    ///
    /// On failure the container ID is kept, so the call can be retried.
    pub async fn stop(&self) -> Result<()> {
        self.traced(self.run_stop()).await
    }

    /// `host:port` of `service`, or an empty string when not running.
    ///
    /// In fixed-port mode every service shares one address.
    pub fn endpoint(&self, service: Service) -> String {
        if !self.is_running() {
            return String::new();
        }
        self.endpoints.lookup(service, self.fixed_port)
    }

    /// [`endpoint`](Self::endpoint) as an `http://` URI, for clients that
    /// need a full URI. Empty when no endpoint is published.
    pub fn endpoint_v2(&self, service: Service) -> String {
        let endpoint = self.endpoint(service);
        if endpoint.is_empty() {
            return endpoint;
        }
        format!("{ENDPOINT_SCHEME}{endpoint}")
    }

    /// Every published endpoint.
    pub fn endpoints(&self) -> HashMap<Service, String> {
        if !self.is_running() {
            return HashMap::new();
        }
        self.endpoints.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state() == InstanceState::Running
    }

    pub fn state(&self) -> InstanceState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// ID of the current container, if any.
    pub fn container_id(&self) -> Option<String> {
        self.container_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Normalized LocalStack version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether every service shares the edge port.
    pub fn is_fixed_port(&self) -> bool {
        self.fixed_port
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn image_source(&self) -> ImageSource {
        self.image_source
    }

    fn set_container_id(&self, id: Option<String>) {
        *self.container_id.write().unwrap_or_else(|e| e.into_inner()) = id;
    }

    fn set_state(&self, state: InstanceState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Run `fut` under the injected logger, if any.
    async fn traced<F: Future>(&self, fut: F) -> F::Output {
        match &self.dispatch {
            Some(dispatch) => fut.with_subscriber(dispatch.clone()).await,
            None => fut.await,
        }
    }

    /// End the previous stop watcher; returns the token for the next one.
    fn retire_watcher(&self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let previous = std::mem::replace(
            &mut *self
                .watcher_shutdown
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            shutdown.clone(),
        );
        previous.cancel();
        shutdown
    }

    fn spawn_stop_watcher(self: &Arc<Self>, cancel: CancellationToken) {
        let shutdown = self.retire_watcher();
        let instance = Arc::downgrade(self);
        let watcher = async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = cancel.cancelled() => {}
            }
            let Some(instance) = instance.upgrade() else {
                return;
            };
            if let Err(e) = instance.run_stop().await {
                tracing::error!("Failed to stop LocalStack after cancellation: {}", e);
            }
        };

        match &self.dispatch {
            Some(dispatch) => tokio::spawn(watcher.with_subscriber(dispatch.clone())),
            None => tokio::spawn(watcher.with_current_subscriber()),
        };
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.watcher_shutdown
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("version", &self.version)
            .field("fixed_port", &self.fixed_port)
            .field("state", &self.state())
            .field("container_id", &self.container_id())
            .field("labels", &self.labels)
            .field("timeout", &self.timeout)
            .field("image_source", &self.image_source)
            .finish_non_exhaustive()
    }
}
