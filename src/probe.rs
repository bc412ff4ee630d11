//! Readiness probe.
//!
//! LocalStack accepts connections well before its services answer, so
//! readiness is judged by a real round trip: create a throwaway DynamoDB
//! table and delete it again. DynamoDB is used because it starts fastest
//! and is always started.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use url::Url;

use crate::error::ProbeError;
use crate::resolver::{SIGNING_REGION, SyntheticCredentials};

/// Checks whether the backend behind `endpoint` accepts traffic.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self, endpoint: &Url) -> Result<(), ProbeError>;
}

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Probe creating and deleting a DynamoDB table over the JSON protocol.
pub struct DynamoDbProbe {
    http_client: reqwest::Client,
    request_timeout: Duration,
}

impl DynamoDbProbe {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    /// Probe whose individual requests give up after `request_timeout`.
    pub fn with_timeout(request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http_client,
            request_timeout,
        }
    }

    async fn call(
        &self,
        endpoint: &Url,
        operation: &'static str,
        body: Value,
    ) -> Result<(), ProbeError> {
        let now = chrono::Utc::now();
        let credentials = SyntheticCredentials::default();
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}/{}/dynamodb/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature={}",
            credentials.access_key_id,
            now.format("%Y%m%d"),
            SIGNING_REGION,
            "0".repeat(64),
        );

        let response = self
            .http_client
            .post(endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header("X-Amz-Date", now.format("%Y%m%dT%H%M%SZ").to_string())
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout(self.request_timeout)
                } else {
                    ProbeError::Request {
                        url: endpoint.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: String = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(200)
            .collect();
        Err(ProbeError::Status {
            operation,
            status: status.as_u16(),
            body,
        })
    }
}

impl Default for DynamoDbProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for DynamoDbProbe {
    async fn check(&self, endpoint: &Url) -> Result<(), ProbeError> {
        // A fresh name per attempt, so a create that succeeded while its
        // delete failed cannot block the next attempt.
        let table = format!("readiness-{}", uuid::Uuid::new_v4().simple());

        self.call(endpoint, "CreateTable", create_table_request(&table))
            .await?;
        self.call(endpoint, "DeleteTable", json!({ "TableName": table }))
            .await
    }
}

fn create_table_request(table: &str) -> Value {
    json!({
        "TableName": table,
        "AttributeDefinitions": [
            { "AttributeName": "PK", "AttributeType": "S" }
        ],
        "KeySchema": [
            { "AttributeName": "PK", "KeyType": "HASH" }
        ],
        "ProvisionedThroughput": {
            "ReadCapacityUnits": 1,
            "WriteCapacityUnits": 1
        }
    })
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve `responses` in order, one per connection, and collect the
    /// `X-Amz-Target` header of each request.
    async fn serve(responses: Vec<&'static str>) -> (Url, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();

        let handle = tokio::spawn(async move {
            let mut targets = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await.to_lowercase();
                if let Some(line) = request.lines().find(|l| l.starts_with("x-amz-target:")) {
                    targets.push(line.trim_start_matches("x-amz-target:").trim().to_string());
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            targets
        });

        (url, handle)
    }

    /// Read one request, headers and body, so closing the socket after the
    /// response does not reset the connection.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nwait";

    #[tokio::test]
    async fn test_create_then_delete() {
        let (url, server) = serve(vec![OK, OK]).await;

        DynamoDbProbe::new().check(&url).await.unwrap();

        let targets = server.await.unwrap();
        assert_eq!(
            targets,
            vec!["dynamodb_20120810.createtable", "dynamodb_20120810.deletetable"]
        );
    }

    #[tokio::test]
    async fn test_error_status_fails_probe() {
        let (url, server) = serve(vec![UNAVAILABLE]).await;

        let err = DynamoDbProbe::new().check(&url).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Status {
                operation: "CreateTable",
                status: 503,
                ..
            }
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_fails_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let err = DynamoDbProbe::with_timeout(Duration::from_secs(1))
            .check(&url)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Request { .. } | ProbeError::Timeout(_)));
    }

    #[test]
    fn test_create_table_request_shape() {
        let request = create_table_request("t");
        assert_eq!(request["TableName"], "t");
        assert_eq!(request["KeySchema"][0]["KeyType"], "HASH");
    }
}
