//! Delivery of the finished artifact and narrative.
//!
//! The pipeline only hands over fully formed, immutable outputs. Transports
//! put the artifact somewhere durable and send the narrative onward;
//! their failures are reported back and never invalidate the run's outputs.

pub mod directory;
pub mod webhook;

pub use directory::DirectoryTransport;
pub use webhook::WebhookTransport;

use crate::error::DeliveryError;
use crate::models::{Artifact, Narrative, NarrativeOrigin};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Notification carrying the narrative and a reference to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub subject: String,
    pub narrative: String,
    pub origin: NarrativeOrigin,
    pub artifact_name: String,
    /// Where the artifact was uploaded, when the upload succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
}

/// The two operations the pipeline needs from a delivery backend.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Persist the artifact; returns its location.
    async fn upload_artifact(&self, artifact: &Artifact) -> Result<String, DeliveryError>;

    async fn send_notification(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Outcome of a delivery attempt.
#[derive(Debug, Default)]
pub struct DeliveryResult {
    pub artifact_location: Option<String>,
    pub notified: bool,
    pub errors: Vec<DeliveryError>,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DeliveryCoordinator {
    transport: Arc<dyn DeliveryTransport>,
    recipient: Option<String>,
}

impl DeliveryCoordinator {
    pub fn new(transport: Arc<dyn DeliveryTransport>, recipient: Option<String>) -> Self {
        Self {
            transport,
            recipient,
        }
    }

    /// Upload the artifact, then send the notification.
    ///
    /// The notification is sent even when the upload failed, so the
    /// narrative still reaches its recipient.
    pub async fn deliver(&self, artifact: &Artifact, narrative: &Narrative) -> DeliveryResult {
        let mut result = DeliveryResult::default();

        match self.transport.upload_artifact(artifact).await {
            Ok(location) => {
                info!("Artifact {} uploaded to {}", artifact.name, location);
                result.artifact_location = Some(location);
            }
            Err(e) => {
                warn!("Artifact upload via {} failed: {}", self.transport.name(), e);
                result.errors.push(e);
            }
        }

        let notification = Notification {
            recipient: self.recipient.clone(),
            subject: subject(narrative),
            narrative: narrative.text().to_string(),
            origin: narrative.origin(),
            artifact_name: artifact.name.clone(),
            artifact_location: result.artifact_location.clone(),
        };

        match self.transport.send_notification(&notification).await {
            Ok(()) => {
                info!("Notification sent via {}", self.transport.name());
                result.notified = true;
            }
            Err(e) => {
                warn!("Notification via {} failed: {}", self.transport.name(), e);
                result.errors.push(e);
            }
        }

        result
    }
}

fn subject(narrative: &Narrative) -> String {
    let report = narrative.report();
    format!(
        "Access Review Report - {} - {}",
        report.account(),
        report.generated_at().format("%Y-%m-%d")
    )
}
