//! Outbox directory transport.

use super::{DeliveryTransport, Notification};
use crate::error::DeliveryError;
use crate::models::Artifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Puts artifacts into an outbox directory and writes each notification
/// next to its artifact as `<artifact>.notification.txt`.
pub struct DirectoryTransport {
    outbox: PathBuf,
}

impl DirectoryTransport {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    fn notification_path(&self, artifact_name: &str) -> PathBuf {
        self.outbox
            .join(format!("{}.notification.txt", artifact_name))
    }
}

#[async_trait]
impl DeliveryTransport for DirectoryTransport {
    fn name(&self) -> &str {
        "directory"
    }

    async fn upload_artifact(&self, artifact: &Artifact) -> Result<String, DeliveryError> {
        tokio::fs::create_dir_all(&self.outbox).await?;
        let path = self.outbox.join(&artifact.name);
        tokio::fs::write(&path, &artifact.bytes).await?;
        debug!("Put {} ({})", path.display(), artifact.content_type);
        Ok(path.display().to_string())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tokio::fs::create_dir_all(&self.outbox).await?;

        let mut message = String::new();
        if let Some(recipient) = &notification.recipient {
            message.push_str(&format!("To: {}\n", recipient));
        }
        message.push_str(&format!("Subject: {}\n", notification.subject));
        message.push_str(&format!("Narrative-Origin: {}\n", notification.origin));
        message.push_str(&format!(
            "Artifact: {}\n\n",
            notification
                .artifact_location
                .as_deref()
                .unwrap_or("(not uploaded)")
        ));
        message.push_str(&notification.narrative);
        message.push('\n');

        let path = self.notification_path(&notification.artifact_name);
        tokio::fs::write(&path, message).await?;
        debug!("Wrote notification {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NarrativeOrigin;

    #[tokio::test]
    async fn test_put_and_notify() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DirectoryTransport::new(dir.path().join("outbox"));
        let artifact = Artifact {
            name: "access-review-2025-04-01-12-00-00.csv".to_string(),
            content_type: "text/csv",
            bytes: b"source,resource_id\n".to_vec(),
            rows: 0,
        };

        let location = transport.upload_artifact(&artifact).await.unwrap();
        assert_eq!(std::fs::read(&location).unwrap(), artifact.bytes);

        transport
            .send_notification(&Notification {
                recipient: Some("security@example.com".to_string()),
                subject: "Access Review Report".to_string(),
                narrative: "Two findings need attention.".to_string(),
                origin: NarrativeOrigin::Fallback,
                artifact_name: artifact.name.clone(),
                artifact_location: Some(location.clone()),
            })
            .await
            .unwrap();

        let written = std::fs::read_to_string(
            transport
                .outbox()
                .join("access-review-2025-04-01-12-00-00.csv.notification.txt"),
        )
        .unwrap();
        assert!(written.starts_with("To: security@example.com\nSubject: Access Review Report\n"));
        assert!(written.contains("Narrative-Origin: fallback"));
        assert!(written.contains(&format!("Artifact: {}", location)));
        assert!(written.ends_with("Two findings need attention.\n"));
    }
}
