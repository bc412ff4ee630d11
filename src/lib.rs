//! Disposable LocalStack containers for integration tests.
//!
//! An [`Instance`] starts LocalStack in Docker, waits until it really
//! answers, and reports per-service endpoints for AWS clients:
//!
//! ```rust,no_run
//! use localstack_harness::{Instance, service};
//!
//! # async fn example() -> localstack_harness::Result<()> {
//! let instance = Instance::builder().version("0.11.4").build()?;
//! instance.start(&[service::SQS]).await?;
//!
//! let sqs = instance.endpoint_v2(service::SQS); // "http://localhost:49153"
//! # let _ = sqs;
//! instance.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod docker;
pub mod endpoints;
pub mod error;
pub mod instance;
pub mod probe;
pub mod resolver;
pub mod service;
pub mod testing;
pub mod version;

pub use error::{LocalstackError, Result};
pub use instance::{ImageSource, Instance, InstanceBuilder, InstanceState, LifecycleSettings};
pub use resolver::{EndpointResolver, ResolvedEndpoint, ServiceResolver};
pub use service::Service;
