//! [`ContainerEngine`] over the bollard Docker client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::models::{HostConfig, PortBinding};
use bytes::Bytes;
use futures::StreamExt;

use crate::docker::{ContainerEngine, ContainerSpec, HostBinding, PortMap, RunningContainer};
use crate::error::{EngineError, LocalstackError};

/// Lines of container output fetched for diagnostics.
const LOG_TAIL: &str = "200";

/// Docker engine reached through bollard.
#[derive(Clone)]
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connect to the local daemon socket (or named pipe on Windows).
    pub fn connect_local() -> Result<Self, LocalstackError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            LocalstackError::EngineUnreachable {
                reason: e.to_string(),
            }
        })?;
        Ok(Self { docker })
    }

    /// Connect honoring `DOCKER_HOST` and the related environment variables.
    pub fn connect_from_env() -> Result<Self, LocalstackError> {
        let docker =
            Docker::connect_with_defaults().map_err(|e| LocalstackError::EngineUnreachable {
                reason: e.to_string(),
            })?;
        Ok(Self { docker })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::api("ping", e))
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn build_image(&self, tag: &str, context: Vec<u8>) -> Result<(), EngineError> {
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            q: true,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(Bytes::from(context)));

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| EngineError::api("build image", e))?;
            if let Some(error) = info.error {
                return Err(EngineError::api("build image", error));
            }
            if let Some(line) = info.stream {
                tracing::trace!("Build output: {}", line.trim_end());
            }
        }

        Ok(())
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| EngineError::api("pull image", e))?;
            if let Some(status) = info.status {
                tracing::trace!("Pull status: {}", status);
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|port| {
                (
                    port.clone(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: None,
                    }]),
                )
            })
            .collect();

        // Exposed ports (bollard expects HashMap<String, HashMap<(), ()>>)
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            auto_remove: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone())
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| EngineError::api("create container", e))?;

        for warning in &response.warnings {
            tracing::debug!("Engine warning for {}: {}", response.id, warning);
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_error("start container", id, e))
    }

    async fn inspect_ports(&self, id: &str) -> Result<PortMap, EngineError> {
        let info = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error("inspect container", id, e))?;

        let ports = info
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        Ok(ports
            .into_iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|b| HostBinding {
                        host_ip: b.host_ip.unwrap_or_default(),
                        host_port: b.host_port.unwrap_or_default(),
                    })
                    .collect();
                (port, bindings)
            })
            .collect())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped. 404: already removed, e.g. by auto-remove
            // after the self-destruct timer fired.
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                tracing::debug!("Container {} was already gone", id);
                Ok(())
            }
            Err(e) => Err(EngineError::api("stop container", e)),
        }
    }

    async fn list_running(&self) -> Result<Vec<RunningContainer>, EngineError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::api("list containers", e))?;

        Ok(containers
            .into_iter()
            .map(|c| RunningContainer {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
            })
            .collect())
    }

    async fn logs(&self, id: &str) -> Result<String, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: LOG_TAIL.to_string(),
            ..Default::default()
        };

        let mut logs = self.docker.logs(id, Some(options));
        let mut output = String::new();

        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => return Err(map_error("read logs", id, e)),
            }
        }

        Ok(output)
    }
}

fn map_error(operation: &'static str, id: &str, error: BollardError) -> EngineError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound { id: id.to_string() },
        other => EngineError::api(operation, other),
    }
}
