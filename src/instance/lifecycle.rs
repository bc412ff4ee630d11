//! Start and stop sequences.

use std::collections::HashMap;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, info, warn};
use url::Url;

use crate::docker::{ContainerSpec, host_port, recipe};
use crate::error::{EngineError, LocalstackError, Result};
use crate::instance::{ENDPOINT_HOST, ENDPOINT_SCHEME, ImageSource, Instance, InstanceState};
use crate::service::{
    AVAILABLE_SERVICES, FIXED_PORT, PROBE_SERVICE, Service, expected_services, services_env,
};

impl Instance {
    /// Start bound to `cancel`; stops whatever a cancelled start left behind.
    pub(super) async fn run_start_bound(
        &self,
        cancel: &CancellationToken,
        services: &[Service],
    ) -> Result<()> {
        let result = self.run_start(cancel, services).await;

        // The background watcher may have run before the container existed.
        if matches!(result, Err(LocalstackError::Cancelled))
            && self.container_id().is_some()
            && let Err(e) = self.run_stop().await
        {
            warn!("Failed to stop LocalStack after cancellation: {}", e);
        }

        result
    }

    pub(super) async fn run_start(
        &self,
        cancel: &CancellationToken,
        services: &[Service],
    ) -> Result<()> {
        if self.container_id().is_some() {
            info!("Stopping the running LocalStack instance before restarting");
            self.run_stop()
                .await
                .map_err(|e| LocalstackError::RestartFailed(Box::new(e)))?;
        }

        self.set_state(InstanceState::Starting);
        let result = self.launch_with_retries(cancel, services).await;
        self.set_state(if result.is_ok() {
            InstanceState::Running
        } else {
            InstanceState::Cold
        });
        result
    }

    async fn launch_with_retries(
        &self,
        cancel: &CancellationToken,
        services: &[Service],
    ) -> Result<()> {
        let attempts = self.settings.start_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self.launch(cancel, services).await;

            let Err(error) = result else {
                return Ok(());
            };
            if !error.is_retryable() {
                return Err(error);
            }

            // Auto-removed; nothing left to stop.
            self.forget_container();
            if attempt >= attempts {
                return Err(error);
            }

            warn!(
                attempt,
                attempts, "LocalStack container went away during startup: {}", error
            );
            cancellable(cancel, tokio::time::sleep(self.settings.start_retry_backoff)).await?;
            attempt += 1;
        }
    }

    pub(super) async fn run_stop(&self) -> Result<()> {
        let Some(id) = self.container_id() else {
            return Ok(());
        };

        let previous = self.state();
        self.set_state(InstanceState::Stopping);
        if let Err(e) = self
            .engine
            .stop_container(&id, self.settings.stop_grace)
            .await
        {
            self.set_state(previous);
            return Err(LocalstackError::StopFailed {
                id,
                reason: e.to_string(),
            });
        }

        self.forget_container();
        self.set_state(InstanceState::Cold);
        info!(container = %id, "Stopped LocalStack");
        Ok(())
    }

    /// One pass of the start sequence, from image to published endpoints.
    async fn launch(&self, cancel: &CancellationToken, services: &[Service]) -> Result<()> {
        let image = cancellable(cancel, self.prepare_image()).await??;

        let spec = self.container_spec(image, services);
        // A container created as the token fires is still recorded.
        let created = tokio::select! {
            biased;
            created = self.engine.create_container(&spec) => created,
            _ = cancel.cancelled() => return Err(LocalstackError::Cancelled),
        };
        let id = created.map_err(|e| LocalstackError::ContainerCreateFailed {
            reason: e.to_string(),
        })?;

        // Recorded before starting so a failed start can still be stopped.
        self.set_container_id(Some(id.clone()));

        info!(container = %id, version = %self.version, "Starting LocalStack");
        cancellable(cancel, self.engine.start_container(&id))
            .await?
            .map_err(|e| LocalstackError::ContainerStartFailed {
                id: id.clone(),
                reason: e.to_string(),
            })?;

        let result = self.await_ready(cancel, &id, services).await;
        if let Err(e) = &result
            && !matches!(e, LocalstackError::Cancelled)
            && tracing::enabled!(Level::DEBUG)
        {
            self.dump_logs(&id).await;
        }
        result
    }

    async fn await_ready(
        &self,
        cancel: &CancellationToken,
        id: &str,
        services: &[Service],
    ) -> Result<()> {
        let mapping = self.discover_ports(cancel, id, services).await?;
        let probe_url = self.probe_url(&mapping)?;

        info!("Waiting for LocalStack to start...");
        self.wait_until_available(cancel, id, &probe_url).await?;

        self.endpoints.publish(mapping);
        info!(container = %id, "LocalStack is ready");
        Ok(())
    }

    async fn prepare_image(&self) -> Result<String> {
        match self.image_source {
            ImageSource::Build => {
                let tag = recipe::local_tag(&self.version, self.timeout);
                if self.engine.image_exists(&tag).await {
                    debug!(image = %tag, "Reusing local image");
                    return Ok(tag);
                }

                info!(image = %tag, "Building LocalStack image");
                let context = recipe::build_context(&self.version, self.timeout).map_err(|e| {
                    LocalstackError::ImageUnavailable {
                        image: tag.clone(),
                        reason: e.to_string(),
                    }
                })?;
                self.engine
                    .build_image(&tag, context)
                    .await
                    .map_err(|e| LocalstackError::ImageUnavailable {
                        image: tag.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(tag)
            }
            ImageSource::Pull => {
                let image = recipe::upstream_image(&self.version);
                if self.engine.image_exists(&image).await {
                    debug!(image = %image, "Image already present");
                    return Ok(image);
                }

                info!(image = %image, "Pulling LocalStack image");
                self.engine
                    .pull_image(&image)
                    .await
                    .map_err(|e| LocalstackError::ImageUnavailable {
                        image: image.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(image)
            }
        }
    }

    fn container_spec(&self, image: String, services: &[Service]) -> ContainerSpec {
        ContainerSpec {
            image,
            env: services_env(services).into_iter().collect(),
            labels: self.labels.clone(),
            ports: AVAILABLE_SERVICES
                .iter()
                .map(|service| service.port.to_string())
                .collect(),
        }
    }

    /// Poll the container until every expected port has a host binding.
    async fn discover_ports(
        &self,
        cancel: &CancellationToken,
        id: &str,
        services: &[Service],
    ) -> Result<HashMap<Service, String>> {
        let expected = if self.fixed_port {
            vec![FIXED_PORT]
        } else {
            expected_services(services)
        };

        let mut retries = 0;
        loop {
            let ports = match cancellable(cancel, self.engine.inspect_ports(id)).await? {
                Ok(ports) => ports,
                Err(EngineError::NotFound { .. }) => {
                    return Err(LocalstackError::ContainerDisappeared { id: id.to_string() });
                }
                Err(e) => {
                    return Err(LocalstackError::PortDiscoveryFailed {
                        reason: e.to_string(),
                    });
                }
            };

            let mut mapping = HashMap::with_capacity(expected.len());
            let mut missing = Vec::new();
            for service in &expected {
                match host_port(&ports, service.port) {
                    Some(port) => {
                        mapping.insert(*service, format!("{ENDPOINT_HOST}:{port}"));
                    }
                    None => missing.push(service.port),
                }
            }

            if missing.is_empty() {
                return Ok(mapping);
            }
            if retries >= self.settings.port_discovery_retries {
                return Err(LocalstackError::PortDiscoveryFailed {
                    reason: format!(
                        "no host binding for {} after {} inspections",
                        missing.join(", "),
                        retries + 1
                    ),
                });
            }

            retries += 1;
            debug!(
                retry = retries,
                "Host ports not bound yet: {}",
                missing.join(", ")
            );
            cancellable(cancel, tokio::time::sleep(self.settings.port_discovery_interval))
                .await?;
        }
    }

    fn probe_url(&self, mapping: &HashMap<Service, String>) -> Result<Url> {
        let key = if self.fixed_port {
            FIXED_PORT
        } else {
            PROBE_SERVICE
        };
        let endpoint = mapping.get(&key).cloned().unwrap_or_default();

        Url::parse(&format!("{ENDPOINT_SCHEME}{endpoint}")).map_err(|e| {
            LocalstackError::MalformedEndpoint {
                endpoint,
                reason: e.to_string(),
            }
        })
    }

    /// Probe on every tick until LocalStack answers or the container is gone.
    async fn wait_until_available(
        &self,
        cancel: &CancellationToken,
        id: &str,
        url: &Url,
    ) -> Result<()> {
        let mut attempt: u64 = 0;
        loop {
            cancellable(cancel, tokio::time::sleep(self.settings.readiness_interval)).await?;
            attempt += 1;

            self.ensure_running(cancel, id).await?;

            match cancellable(cancel, self.probe.check(url)).await? {
                Ok(()) => return Ok(()),
                Err(e) => debug!(attempt, "LocalStack not ready yet: {}", e),
            }
        }
    }

    async fn ensure_running(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let running = cancellable(cancel, self.engine.list_running()).await??;
        if running.iter().any(|container| container.id == id) {
            Ok(())
        } else {
            Err(LocalstackError::ContainerDisappeared { id: id.to_string() })
        }
    }

    async fn dump_logs(&self, id: &str) {
        match self.engine.logs(id).await {
            Ok(logs) if !logs.is_empty() => {
                debug!(container = %id, "LocalStack container output:\n{}", logs.trim_end());
            }
            Ok(_) => {}
            Err(e) => debug!(container = %id, "Could not read container logs: {}", e),
        }
    }

    fn forget_container(&self) {
        self.set_container_id(None);
        self.endpoints.clear();
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LocalstackError::Cancelled),
        output = fut => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::docker::ContainerEngine;
    use crate::instance::LifecycleSettings;
    use crate::service::{DYNAMODB, S3, SQS};
    use crate::testing::{FakeEngine, ScriptedProbe};

    fn quick_settings() -> LifecycleSettings {
        LifecycleSettings {
            port_discovery_interval: Duration::from_millis(1),
            readiness_interval: Duration::from_millis(1),
            start_retry_backoff: Duration::from_millis(1),
            ..LifecycleSettings::default()
        }
    }

    fn instance(engine: &Arc<FakeEngine>, version: &str) -> Instance {
        Instance::builder()
            .engine(engine.clone() as Arc<dyn ContainerEngine>)
            .probe(Arc::new(ScriptedProbe::ready()))
            .version(version)
            .settings(quick_settings())
            .build()
            .unwrap()
    }

    #[test]
    fn test_container_spec_publishes_every_port() {
        let engine = Arc::new(FakeEngine::new());
        let instance = instance(&engine, "0.11.4");

        let spec = instance.container_spec("img".to_string(), &[S3]);
        assert_eq!(spec.ports.len(), AVAILABLE_SERVICES.len());
        assert!(spec.ports.contains(&"4566/tcp".to_string()));
        assert_eq!(spec.env, vec!["SERVICES=dynamodb,s3".to_string()]);
    }

    #[test]
    fn test_container_spec_without_filter_has_no_env() {
        let engine = Arc::new(FakeEngine::new());
        let instance = instance(&engine, "latest");

        let spec = instance.container_spec("img".to_string(), &[]);
        assert!(spec.env.is_empty());
    }

    #[tokio::test]
    async fn test_probe_url_uses_probe_service() {
        let engine = Arc::new(FakeEngine::new());
        let instance = instance(&engine, "0.11.4");

        let mapping = HashMap::from([
            (DYNAMODB, "localhost:40001".to_string()),
            (SQS, "localhost:40002".to_string()),
        ]);
        let url = instance.probe_url(&mapping).unwrap();
        assert_eq!(url.as_str(), "http://localhost:40001/");
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = cancellable(&cancel, async { 1 }).await;
        assert!(matches!(result, Err(LocalstackError::Cancelled)));
    }

    #[tokio::test]
    async fn test_forget_container_clears_endpoints() {
        let engine = Arc::new(FakeEngine::new());
        let instance = instance(&engine, "latest");

        instance.start(&[]).await.unwrap();
        assert!(!instance.endpoint(SQS).is_empty());

        instance.forget_container();
        assert!(instance.container_id().is_none());
        assert!(instance.endpoints.is_empty());
    }
}
