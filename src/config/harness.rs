use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;
use crate::instance::{DEFAULT_TIMEOUT, ImageSource, InstanceBuilder};
use crate::service::Service;
use crate::version::LATEST;

/// Instance settings read from `LOCALSTACK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// LocalStack version to run.
    pub version: String,
    /// Services to start; empty starts everything.
    pub services: Vec<Service>,
    /// Seconds after which the container tears itself down.
    pub timeout_secs: u64,
    /// Connect to Docker through `DOCKER_HOST` and friends.
    pub docker_from_env: bool,
    /// Run the upstream image instead of building the self-destructing one.
    pub pull_image: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            version: LATEST.to_string(),
            services: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            docker_from_env: false,
            pull_image: false,
        }
    }
}

impl HarnessConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let services = match optional_env("LOCALSTACK_SERVICES")? {
            Some(list) => parse_services(&list).map_err(|name| ConfigError::InvalidValue {
                key: "LOCALSTACK_SERVICES".to_string(),
                message: format!("unknown service {name:?}"),
            })?,
            None => defaults.services,
        };

        let timeout_secs = parse_optional_env("LOCALSTACK_TIMEOUT_SECS", defaults.timeout_secs)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LOCALSTACK_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            version: optional_env("LOCALSTACK_VERSION")?.unwrap_or(defaults.version),
            services,
            timeout_secs,
            docker_from_env: parse_bool_env("LOCALSTACK_DOCKER_FROM_ENV", defaults.docker_from_env)?,
            pull_image: parse_bool_env("LOCALSTACK_PULL_IMAGE", defaults.pull_image)?,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn image_source(&self) -> ImageSource {
        if self.pull_image {
            ImageSource::Pull
        } else {
            ImageSource::Build
        }
    }

    /// Builder carrying these settings.
    pub fn builder(&self) -> InstanceBuilder {
        let builder = InstanceBuilder::new()
            .version(self.version.clone())
            .timeout(self.timeout())
            .image_source(self.image_source());

        if self.docker_from_env {
            builder.client_from_env()
        } else {
            builder
        }
    }
}

/// Parse a comma separated list of service names. Returns the first unknown
/// name on failure.
pub fn parse_services(list: &str) -> Result<Vec<Service>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| Service::from_name(name).ok_or_else(|| name.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::service::{S3, SQS};

    /// Serializes env-mutating tests to prevent parallel races.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: [&str; 5] = [
        "LOCALSTACK_VERSION",
        "LOCALSTACK_SERVICES",
        "LOCALSTACK_TIMEOUT_SECS",
        "LOCALSTACK_DOCKER_FROM_ENV",
        "LOCALSTACK_PULL_IMAGE",
    ];

    fn clear_env() {
        // SAFETY: Only called under ENV_MUTEX in tests.
        unsafe {
            for key in KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_defaults_without_env() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let config = HarnessConfig::resolve().expect("resolve should succeed");
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.image_source(), ImageSource::Build);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("LOCALSTACK_VERSION", "0.11.4");
            std::env::set_var("LOCALSTACK_SERVICES", "sqs, S3");
            std::env::set_var("LOCALSTACK_TIMEOUT_SECS", "90");
            std::env::set_var("LOCALSTACK_PULL_IMAGE", "TRUE");
        }

        let config = HarnessConfig::resolve().expect("resolve should succeed");
        assert_eq!(config.version, "0.11.4");
        assert_eq!(config.services, vec![SQS, S3]);
        assert_eq!(config.timeout(), Duration::from_secs(90));
        assert_eq!(config.image_source(), ImageSource::Pull);
        assert!(!config.docker_from_env);

        clear_env();
    }

    #[test]
    fn test_unknown_service_rejected() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("LOCALSTACK_SERVICES", "sqs,glacier");
        }

        let err = HarnessConfig::resolve().unwrap_err();
        assert!(err.to_string().contains("glacier"));

        clear_env();
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("LOCALSTACK_TIMEOUT_SECS", "soon");
        }
        assert!(HarnessConfig::resolve().is_err());

        // SAFETY: Under ENV_MUTEX.
        unsafe {
            std::env::set_var("LOCALSTACK_TIMEOUT_SECS", "0");
        }
        assert!(HarnessConfig::resolve().is_err());

        clear_env();
    }

    #[test]
    fn test_parse_services_skips_blanks() {
        assert_eq!(parse_services("sqs,,s3,"), Ok(vec![SQS, S3]));
        assert_eq!(parse_services(""), Ok(Vec::new()));
    }
}
