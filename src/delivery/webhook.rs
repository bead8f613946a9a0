//! HTTP transport: object PUT for the artifact, JSON POST for the notification.

use super::{DeliveryTransport, Notification};
use crate::error::DeliveryError;
use crate::models::Artifact;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

pub struct WebhookTransport {
    upload_base: String,
    webhook_url: String,
    http_client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(upload_base: &str, webhook_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            upload_base: upload_base.trim_end_matches('/').to_string(),
            webhook_url: webhook_url.to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn upload_artifact(&self, artifact: &Artifact) -> Result<String, DeliveryError> {
        let url = format!("{}/{}", self.upload_base, artifact.name);
        debug!("PUT {}", url);

        let response = self
            .http_client
            .put(&url)
            .header(CONTENT_TYPE, artifact.content_type)
            .body(artifact.bytes.clone())
            .send()
            .await
            .map_err(|e| DeliveryError::Upload(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Upload(format!(
                "PUT {} returned {}",
                url,
                response.status()
            )));
        }

        Ok(url)
    }

    async fn send_notification(&self, notification: &Notification) -> Result<(), DeliveryError> {
        debug!("POST {}", self.webhook_url);

        let response = self
            .http_client
            .post(&self.webhook_url)
            .json(notification)
            .send()
            .await
            .map_err(|e| DeliveryError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Notification(format!(
                "webhook returned {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NarrativeOrigin;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn artifact() -> Artifact {
        Artifact {
            name: "access-review-2025-04-01-12-00-00.csv".to_string(),
            content_type: "text/csv",
            bytes: b"source,resource_id\n".to_vec(),
            rows: 0,
        }
    }

    #[tokio::test]
    async fn test_upload_puts_object() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reports/access-review-2025-04-01-12-00-00.csv"))
            .and(header("content-type", "text/csv"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(
            &format!("{}/reports/", server.uri()),
            &format!("{}/hook", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let location = transport.upload_artifact(&artifact()).await.unwrap();
        assert_eq!(
            location,
            format!("{}/reports/access-review-2025-04-01-12-00-00.csv", server.uri())
        );
    }

    #[tokio::test]
    async fn test_notification_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "subject": "Access Review Report",
                "origin": "model",
                "artifact_name": "access-review-2025-04-01-12-00-00.csv"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = WebhookTransport::new(
            &server.uri(),
            &format!("{}/hook", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        transport
            .send_notification(&Notification {
                recipient: None,
                subject: "Access Review Report".to_string(),
                narrative: "All clear.".to_string(),
                origin: NarrativeOrigin::Model,
                artifact_name: artifact().name,
                artifact_location: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_upload_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let transport =
            WebhookTransport::new(&server.uri(), &server.uri(), Duration::from_secs(5)).unwrap();

        let err = transport.upload_artifact(&artifact()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upload(_)));
        assert!(err.to_string().contains("403"));
    }
}
