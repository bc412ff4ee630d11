//! Test doubles for driving an [`Instance`](crate::Instance) without Docker.
//!
//! Provides:
//! - [`FakeEngine`]: an in-memory [`ContainerEngine`] with failure toggles
//! - [`ScriptedProbe`]: a [`ReadinessProbe`] that fails a set number of times
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use localstack_harness::Instance;
//! use localstack_harness::testing::{FakeEngine, ScriptedProbe};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let engine = Arc::new(FakeEngine::new());
//!     let instance = Instance::builder()
//!         .engine(engine.clone())
//!         .probe(Arc::new(ScriptedProbe::ready()))
//!         .build()
//!         .unwrap();
//!     instance.start(&[]).await.unwrap();
//!     assert_eq!(engine.calls().create, 1);
//! }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::docker::{ContainerEngine, ContainerSpec, HostBinding, PortMap, RunningContainer};
use crate::error::{EngineError, ProbeError};
use crate::probe::ReadinessProbe;

/// Number of calls made to each [`FakeEngine`] operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub build: u32,
    pub pull: u32,
    pub create: u32,
    pub start: u32,
    pub inspect: u32,
    pub stop: u32,
    pub list: u32,
    pub logs: u32,
}

#[derive(Default)]
struct FakeState {
    calls: CallCounts,
    images: HashSet<String>,
    /// Containers that exist, keyed by ID, with their host port mapping.
    containers: HashMap<String, (ContainerSpec, PortMap)>,
    running: Vec<String>,
    created: Vec<ContainerSpec>,
    stopped: Vec<String>,
    next_container: u16,
    build_error: Option<String>,
    pull_error: Option<String>,
    create_error: Option<String>,
    start_error: Option<String>,
    stop_error: Option<String>,
    inspect_error: Option<String>,
    inspect_script: VecDeque<PortMap>,
    unbound_ports: bool,
    withheld_ports: HashSet<String>,
    vanishing_starts: u32,
}

/// In-memory container engine.
///
/// Created containers get host ports `40000 + 100 * n + i`, where `n` counts
/// containers and `i` is the port's position in the spec, so every
/// container has distinct endpoints. Starting a container marks it running;
/// stopping removes it, as an auto-removed container would be.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Every spec passed to `create_container`, in order.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state().created.clone()
    }

    /// IDs stopped successfully, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    /// IDs currently running.
    pub fn running(&self) -> Vec<String> {
        self.state().running.clone()
    }

    /// Images present locally.
    pub fn images(&self) -> HashSet<String> {
        self.state().images.clone()
    }

    /// Make an image present without building or pulling it.
    pub fn add_image(&self, image: impl Into<String>) {
        self.state().images.insert(image.into());
    }

    pub fn fail_build(&self, reason: impl Into<String>) {
        self.state().build_error = Some(reason.into());
    }

    pub fn fail_pull(&self, reason: impl Into<String>) {
        self.state().pull_error = Some(reason.into());
    }

    pub fn fail_create(&self, reason: impl Into<String>) {
        self.state().create_error = Some(reason.into());
    }

    pub fn fail_start(&self, reason: impl Into<String>) {
        self.state().start_error = Some(reason.into());
    }

    /// Toggle stop failures at runtime.
    pub fn set_stop_failing(&self, reason: Option<&str>) {
        self.state().stop_error = reason.map(str::to_string);
    }

    pub fn fail_inspect(&self, reason: impl Into<String>) {
        self.state().inspect_error = Some(reason.into());
    }

    /// Never report host bindings for any port.
    pub fn withhold_ports(&self) {
        self.state().unbound_ports = true;
    }

    /// Never report a host binding for container port `port` (`4576/tcp`).
    pub fn withhold_port(&self, port: &str) {
        self.state().withheld_ports.insert(port.to_string());
    }

    /// Answer the next inspections with `maps`, in order, before falling
    /// back to the container's own mapping.
    pub fn script_inspections(&self, maps: Vec<PortMap>) {
        self.state().inspect_script.extend(maps);
    }

    /// The next `count` started containers exit right away. They can still
    /// be inspected but never show up as running.
    pub fn vanish_next_starts(&self, count: u32) {
        self.state().vanishing_starts = count;
    }

    /// Remove a container behind the harness's back.
    pub fn kill(&self, id: &str) {
        let mut state = self.state();
        state.running.retain(|running| running != id);
        state.containers.remove(id);
    }

    /// Host port bound for `port` on container `id`.
    pub fn host_port(&self, id: &str, port: &str) -> Option<String> {
        let state = self.state();
        let (_, ports) = state.containers.get(id)?;
        crate::docker::host_port(ports, port)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn port_map(container: u16, spec: &ContainerSpec) -> PortMap {
    spec.ports
        .iter()
        .enumerate()
        .map(|(i, port)| {
            let host_port = 40000 + 100 * container + i as u16;
            (
                port.clone(),
                vec![HostBinding {
                    host_ip: "0.0.0.0".to_string(),
                    host_port: host_port.to_string(),
                }],
            )
        })
        .collect()
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build_image(&self, tag: &str, _context: Vec<u8>) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.build += 1;
        if let Some(reason) = &state.build_error {
            return Err(EngineError::api("build image", reason));
        }
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.pull += 1;
        if let Some(reason) = &state.pull_error {
            return Err(EngineError::api("pull image", reason));
        }
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state();
        state.calls.create += 1;
        state.created.push(spec.clone());
        if let Some(reason) = &state.create_error {
            return Err(EngineError::api("create container", reason));
        }

        state.next_container += 1;
        let number = state.next_container;
        let id = format!("fake-{number:04}");
        state
            .containers
            .insert(id.clone(), (spec.clone(), port_map(number, spec)));
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.start += 1;
        if let Some(reason) = &state.start_error {
            return Err(EngineError::api("start container", reason));
        }
        if !state.containers.contains_key(id) {
            return Err(EngineError::NotFound { id: id.to_string() });
        }

        if state.vanishing_starts > 0 {
            state.vanishing_starts -= 1;
        } else {
            state.running.push(id.to_string());
        }
        Ok(())
    }

    async fn inspect_ports(&self, id: &str) -> Result<PortMap, EngineError> {
        let mut state = self.state();
        state.calls.inspect += 1;
        if let Some(reason) = &state.inspect_error {
            return Err(EngineError::api("inspect container", reason));
        }
        let Some((_, ports)) = state.containers.get(id) else {
            return Err(EngineError::NotFound { id: id.to_string() });
        };
        let mut ports = ports.clone();
        ports.retain(|port, _| !state.withheld_ports.contains(port));

        if state.unbound_ports {
            return Ok(PortMap::new());
        }
        if let Some(scripted) = state.inspect_script.pop_front() {
            return Ok(scripted);
        }
        Ok(ports)
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.stop += 1;
        if let Some(reason) = &state.stop_error {
            return Err(EngineError::api("stop container", reason));
        }
        state.running.retain(|running| running != id);
        state.containers.remove(id);
        state.stopped.push(id.to_string());
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<RunningContainer>, EngineError> {
        let mut state = self.state();
        state.calls.list += 1;
        Ok(state
            .running
            .iter()
            .map(|id| RunningContainer {
                id: id.clone(),
                image: state
                    .containers
                    .get(id)
                    .map(|(spec, _)| spec.image.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn logs(&self, id: &str) -> Result<String, EngineError> {
        self.state().calls.logs += 1;
        Ok(format!("output of {id}\n"))
    }
}

/// Readiness probe that fails a fixed number of times, then succeeds.
pub struct ScriptedProbe {
    failures_left: AtomicU32,
    call_count: AtomicU32,
    urls: Mutex<Vec<Url>>,
}

impl ScriptedProbe {
    /// Probe that succeeds on the first call.
    pub fn ready() -> Self {
        Self::failing_times(0)
    }

    /// Probe whose first `failures` calls fail.
    pub fn failing_times(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            call_count: AtomicU32::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Probe that never succeeds.
    pub fn never_ready() -> Self {
        Self::failing_times(u32::MAX)
    }

    /// Number of probe calls so far.
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// URLs probed, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReadinessProbe for ScriptedProbe {
    async fn check(&self, endpoint: &Url) -> Result<(), ProbeError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(endpoint.clone());

        let failing = self
            .failures_left
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();

        if failing {
            Err(ProbeError::Status {
                operation: "CreateTable",
                status: 503,
                body: "not ready".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
