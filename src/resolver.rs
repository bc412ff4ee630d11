//! Endpoint resolvers for AWS clients.
//!
//! Each resolver answers with the URL of one service on a running
//! [`Instance`], plus the signing properties an AWS client needs to talk to
//! it. The endpoint is read on every call, so a resolver built before a
//! restart follows the new container.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::error::{LocalstackError, Result};
use crate::instance::Instance;
use crate::service::{self, Service};

/// Region every request is signed for.
pub const SIGNING_REGION: &str = "us-east-1";

/// Signature scheme LocalStack accepts.
pub const SIGNING_SCHEME: &str = "aws.auth#sigv4";

/// Credentials LocalStack accepts without checking them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl Default for SyntheticCredentials {
    fn default() -> Self {
        Self {
            access_key_id: "dummy".to_string(),
            secret_access_key: "dummy".to_string(),
            session_token: "dummy".to_string(),
        }
    }
}

/// How requests to a resolved endpoint must be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningProperties {
    pub scheme_id: &'static str,
    pub signing_name: String,
    pub signing_region: &'static str,
}

/// Endpoint handed to an AWS client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub url: Url,
    /// Extra headers to send; empty for LocalStack.
    pub headers: HashMap<String, String>,
    pub signing: SigningProperties,
    pub credentials: SyntheticCredentials,
}

/// Source of a client endpoint.
pub trait EndpointResolver: Send + Sync {
    /// Resolve the endpoint for the next request.
    ///
    /// # Errors
    ///
    /// `MalformedEndpoint` when no usable endpoint is published, e.g. the
    /// instance is not running.
    fn resolve_endpoint(&self) -> Result<ResolvedEndpoint>;
}

/// Resolver for one service of an [`Instance`].
#[derive(Debug, Clone)]
pub struct ServiceResolver {
    instance: Arc<Instance>,
    service: Service,
}

macro_rules! service_resolvers {
    ($($(#[$meta:meta])* $name:ident => $service:ident),+ $(,)?) => {
        impl ServiceResolver {
            $(
                $(#[$meta])*
                pub fn $name(instance: Arc<Instance>) -> Self {
                    Self::new(instance, service::$service)
                }
            )+
        }
    };
}

service_resolvers! {
    cloudformation => CLOUDFORMATION,
    cloudwatch => CLOUDWATCH,
    cloudwatch_logs => CLOUDWATCH_LOGS,
    cloudwatch_events => CLOUDWATCH_EVENTS,
    dynamodb => DYNAMODB,
    dynamodb_streams => DYNAMODB_STREAMS,
    ec2 => EC2,
    es => ES,
    firehose => FIREHOSE,
    iam => IAM,
    kinesis => KINESIS,
    lambda => LAMBDA,
    redshift => REDSHIFT,
    route53 => ROUTE53,
    /// Path-style addressing is required by S3 clients talking to LocalStack.
    s3 => S3,
    secrets_manager => SECRETS_MANAGER,
    ses => SES,
    sns => SNS,
    sqs => SQS,
    ssm => SSM,
    sts => STS,
    step_functions => STEP_FUNCTIONS,
}

impl ServiceResolver {
    pub fn new(instance: Arc<Instance>, service: Service) -> Self {
        Self { instance, service }
    }

    pub fn service(&self) -> Service {
        self.service
    }
}

impl EndpointResolver for ServiceResolver {
    fn resolve_endpoint(&self) -> Result<ResolvedEndpoint> {
        resolve_endpoint(&self.instance.endpoint_v2(self.service), self.service)
    }
}

/// Turn a published endpoint URI into a [`ResolvedEndpoint`].
pub fn resolve_endpoint(endpoint: &str, service: Service) -> Result<ResolvedEndpoint> {
    let url = Url::parse(endpoint).map_err(|e| LocalstackError::MalformedEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    if url.host_str().is_none_or(str::is_empty) {
        return Err(LocalstackError::MalformedEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(ResolvedEndpoint {
        url,
        headers: HashMap::new(),
        signing: SigningProperties {
            scheme_id: SIGNING_SCHEME,
            signing_name: service.signing_name().to_string(),
            signing_region: SIGNING_REGION,
        },
        credentials: SyntheticCredentials::default(),
    })
}
