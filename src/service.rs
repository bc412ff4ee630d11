//! Catalog of the AWS services LocalStack emulates.
//!
//! Every entry carries the container port the service listens on in
//! per-service mode. [`FIXED_PORT`] is the shared edge port used by
//! LocalStack 0.11.5 and later, where every service answers on one port.

use std::fmt;

/// An AWS service exposed by the LocalStack container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Service {
    /// Name passed to LocalStack in the `SERVICES` variable.
    pub name: &'static str,
    /// Container port and protocol, e.g. `4576/tcp`.
    pub port: &'static str,
}

impl Service {
    pub const fn new(name: &'static str, port: &'static str) -> Self {
        Self { name, port }
    }

    /// Numeric container port, without the protocol suffix.
    pub fn port_number(&self) -> u16 {
        self.port
            .split('/')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }

    /// SigV4 signing name of this service.
    ///
    /// The edge port signs as DynamoDB, the service the readiness probe
    /// talks to.
    pub fn signing_name(&self) -> &'static str {
        match self.name {
            "all" | "dynamoDB" | "dynamoDBStreams" => "dynamodb",
            "cloudwatch" => "monitoring",
            "cloudwatchlogs" => "logs",
            "cloudwatchevents" => "events",
            "stepfunctions" => "states",
            name => name,
        }
    }

    /// Look a service up by name, ignoring case.
    pub fn from_name(name: &str) -> Option<Service> {
        let name = name.trim();
        AVAILABLE_SERVICES
            .iter()
            .copied()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.port)
    }
}

/// Shared edge port serving every service in fixed-port mode.
pub const FIXED_PORT: Service = Service::new("all", "4566/tcp");

pub const CLOUDFORMATION: Service = Service::new("cloudformation", "4581/tcp");
pub const CLOUDWATCH: Service = Service::new("cloudwatch", "4582/tcp");
pub const CLOUDWATCH_LOGS: Service = Service::new("cloudwatchlogs", "4586/tcp");
pub const CLOUDWATCH_EVENTS: Service = Service::new("cloudwatchevents", "4587/tcp");
pub const DYNAMODB: Service = Service::new("dynamoDB", "4569/tcp");
pub const DYNAMODB_STREAMS: Service = Service::new("dynamoDBStreams", "4570/tcp");
pub const EC2: Service = Service::new("ec2", "4597/tcp");
pub const ES: Service = Service::new("es", "4578/tcp");
pub const FIREHOSE: Service = Service::new("firehose", "4573/tcp");
pub const IAM: Service = Service::new("iam", "4593/tcp");
pub const KINESIS: Service = Service::new("kinesis", "4568/tcp");
pub const LAMBDA: Service = Service::new("lambda", "4574/tcp");
pub const REDSHIFT: Service = Service::new("redshift", "4577/tcp");
pub const ROUTE53: Service = Service::new("route53", "4580/tcp");
pub const S3: Service = Service::new("s3", "4572/tcp");
pub const SECRETS_MANAGER: Service = Service::new("secretsmanager", "4584/tcp");
pub const SES: Service = Service::new("ses", "4579/tcp");
pub const SNS: Service = Service::new("sns", "4575/tcp");
pub const SQS: Service = Service::new("sqs", "4576/tcp");
pub const SSM: Service = Service::new("ssm", "4583/tcp");
pub const STS: Service = Service::new("sts", "4592/tcp");
pub const STEP_FUNCTIONS: Service = Service::new("stepfunctions", "4585/tcp");

/// Every port the container publishes, the shared edge port first.
pub const AVAILABLE_SERVICES: [Service; 23] = [
    FIXED_PORT,
    CLOUDFORMATION,
    CLOUDWATCH,
    CLOUDWATCH_LOGS,
    CLOUDWATCH_EVENTS,
    DYNAMODB,
    DYNAMODB_STREAMS,
    EC2,
    ES,
    FIREHOSE,
    IAM,
    KINESIS,
    LAMBDA,
    REDSHIFT,
    ROUTE53,
    S3,
    SECRETS_MANAGER,
    SES,
    SNS,
    SQS,
    SSM,
    STS,
    STEP_FUNCTIONS,
];

/// Service the readiness probe talks to. It is always started, whatever
/// subset the caller asked for.
pub const PROBE_SERVICE: Service = DYNAMODB;

/// Whether a selected service goes into the `SERVICES` list.
///
/// The probe service is always listed first, the edge port is not a
/// service, and Elasticsearch is left to LocalStack's default startup.
pub(crate) fn is_selectable(service: Service) -> bool {
    service != PROBE_SERVICE && service != FIXED_PORT && service != ES
}

/// Build the `SERVICES=...` entry restricting which services start.
///
/// Returns `None` when nothing beyond the probe service was selected, so
/// LocalStack starts everything.
pub(crate) fn services_env(selected: &[Service]) -> Option<String> {
    let extra: Vec<&str> = selected
        .iter()
        .filter(|s| is_selectable(**s))
        .map(|s| s.name)
        .collect();

    if extra.is_empty() {
        return None;
    }
    Some(format!("SERVICES=dynamodb,{}", extra.join(",")))
}

/// Services whose host port must be published once the container is up.
///
/// Without a filter that is the whole catalog. With one, only the selected
/// services plus the probe service are expected to answer.
pub(crate) fn expected_services(selected: &[Service]) -> Vec<Service> {
    if selected.is_empty() {
        return AVAILABLE_SERVICES.to_vec();
    }
    AVAILABLE_SERVICES
        .iter()
        .copied()
        .filter(|s| *s == PROBE_SERVICE || selected.contains(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_catalog_ports_are_unique() {
        let ports: HashSet<_> = AVAILABLE_SERVICES.iter().map(|s| s.port).collect();
        assert_eq!(ports.len(), AVAILABLE_SERVICES.len());
    }

    #[test]
    fn test_port_number() {
        assert_eq!(SQS.port_number(), 4576);
        assert_eq!(FIXED_PORT.port_number(), 4566);
    }

    #[test]
    fn test_from_name_ignores_case() {
        assert_eq!(Service::from_name("DynamoDB"), Some(DYNAMODB));
        assert_eq!(Service::from_name(" s3 "), Some(S3));
        assert_eq!(Service::from_name("bigtable"), None);
    }

    #[test]
    fn test_signing_names() {
        assert_eq!(SQS.signing_name(), "sqs");
        assert_eq!(DYNAMODB.signing_name(), "dynamodb");
        assert_eq!(DYNAMODB_STREAMS.signing_name(), "dynamodb");
        assert_eq!(CLOUDWATCH.signing_name(), "monitoring");
        assert_eq!(CLOUDWATCH_LOGS.signing_name(), "logs");
        assert_eq!(CLOUDWATCH_EVENTS.signing_name(), "events");
        assert_eq!(STEP_FUNCTIONS.signing_name(), "states");
        assert_eq!(FIXED_PORT.signing_name(), "dynamodb");
    }

    #[test]
    fn test_signing_names_are_lowercase() {
        for service in AVAILABLE_SERVICES {
            let name = service.signing_name();
            assert_eq!(name, name.to_ascii_lowercase(), "{service}");
        }
    }

    #[test]
    fn test_services_env_without_filter() {
        assert_eq!(services_env(&[]), None);
    }

    #[test]
    fn test_services_env_skips_probe_edge_and_es() {
        assert_eq!(services_env(&[DYNAMODB, FIXED_PORT, ES]), None);
        assert_eq!(
            services_env(&[SQS, DYNAMODB, S3]).as_deref(),
            Some("SERVICES=dynamodb,sqs,s3")
        );
    }

    #[test]
    fn test_expected_services_include_probe() {
        let expected = expected_services(&[SQS]);
        assert_eq!(expected, vec![DYNAMODB, SQS]);
        assert_eq!(expected_services(&[]).len(), AVAILABLE_SERVICES.len());
    }
}
