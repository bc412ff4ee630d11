//! Construction of [`Instance`] values.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::Dispatch;

use crate::docker::{BollardEngine, ContainerEngine};
use crate::error::Result;
use crate::instance::Instance;
use crate::probe::{DynamoDbProbe, ReadinessProbe};
use crate::version::{LATEST, VersionPolicy};

/// Default lifetime of a container before it tears itself down.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Where the container image comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageSource {
    /// Build a local image from the embedded recipe. The recipe bakes the
    /// instance timeout into the container entrypoint.
    #[default]
    Build,
    /// Use the published upstream image, pulling it when missing. The
    /// container does not tear itself down.
    Pull,
}

/// Timing and retry knobs of the start sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Extra inspections while waiting for host ports to be bound.
    pub port_discovery_retries: u32,
    /// Delay between port inspections.
    pub port_discovery_interval: Duration,
    /// Delay between readiness probes.
    pub readiness_interval: Duration,
    /// Whole start sequences attempted when the container vanishes.
    pub start_attempts: u32,
    /// Delay before attempting the start sequence again.
    pub start_retry_backoff: Duration,
    /// Time the engine gives the container to exit before killing it.
    pub stop_grace: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            port_discovery_retries: 5,
            port_discovery_interval: Duration::from_secs(1),
            readiness_interval: Duration::from_secs(1),
            start_attempts: 3,
            start_retry_backoff: Duration::from_secs(1),
            stop_grace: Duration::from_secs(1),
        }
    }
}

/// Builder for [`Instance`].
///
/// ```rust,no_run
/// use std::time::Duration;
/// use localstack_harness::Instance;
///
/// # fn example() -> localstack_harness::Result<()> {
/// let instance = Instance::builder()
///     .version("0.11.4")
///     .label("suite", "orders")
///     .timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct InstanceBuilder {
    version: String,
    labels: HashMap<String, String>,
    timeout: Duration,
    engine: Option<Arc<dyn ContainerEngine>>,
    engine_from_env: bool,
    probe: Option<Arc<dyn ReadinessProbe>>,
    image_source: ImageSource,
    dispatch: Option<Dispatch>,
    settings: LifecycleSettings,
}

impl InstanceBuilder {
    pub fn new() -> Self {
        Self {
            version: LATEST.to_string(),
            labels: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            engine: None,
            engine_from_env: false,
            probe: None,
            image_source: ImageSource::default(),
            dispatch: None,
            settings: LifecycleSettings::default(),
        }
    }

    /// LocalStack version: "latest" or a semantic version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the labels applied to the container.
    pub fn labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Add one container label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Lifetime after which the container tears itself down. Guards against
    /// orphaned containers when a test process dies without stopping it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use this engine instead of connecting to the local Docker daemon.
    pub fn engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Connect to Docker honoring `DOCKER_HOST` and related variables.
    pub fn client_from_env(mut self) -> Self {
        self.engine_from_env = true;
        self
    }

    /// Replace the readiness probe.
    pub fn probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn image_source(mut self, source: ImageSource) -> Self {
        self.image_source = source;
        self
    }

    /// Send this instance's log events to `dispatch` instead of the
    /// caller's default subscriber.
    pub fn logger(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    pub fn settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Check the version and connect the engine.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` for an unparseable version, `EngineUnreachable` when
    /// no Docker client can be created.
    pub fn build(self) -> Result<Instance> {
        let policy = VersionPolicy::decide(&self.version)?;

        let engine: Arc<dyn ContainerEngine> = match self.engine {
            Some(engine) => engine,
            None if self.engine_from_env => Arc::new(BollardEngine::connect_from_env()?),
            None => Arc::new(BollardEngine::connect_local()?),
        };
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(DynamoDbProbe::new()));

        Ok(Instance::from_parts(
            engine,
            probe,
            policy,
            self.labels,
            self.timeout,
            self.image_source,
            self.dispatch,
            self.settings,
        ))
    }
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
