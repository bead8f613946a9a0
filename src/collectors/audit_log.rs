//! Audit-trail configuration collector.

use super::{decode_records, fetch_document, finish, has_id, Collector, CollectorOutcome, Record};
use crate::models::{Finding, Severity, Source};
use crate::source::{DataSource, QueryContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

const WELL_ARCHITECTED: &str = "AWS Well-Architected";

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(rename = "trailList", default)]
    trail_list: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Trail {
    name: String,
    #[serde(rename = "TrailARN", default)]
    trail_arn: String,
    #[serde(default)]
    s3_bucket_name: String,
    #[serde(default)]
    is_multi_region_trail: bool,
    #[serde(default)]
    log_file_validation_enabled: bool,
    #[serde(default)]
    status: TrailStatus,
    #[serde(default)]
    event_selectors: Vec<EventSelector>,
    /// Whether the destination bucket has default encryption.
    #[serde(default)]
    bucket_encrypted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrailStatus {
    #[serde(default)]
    is_logging: bool,
    #[serde(default)]
    latest_delivery_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EventSelector {
    #[serde(default)]
    read_write_type: String,
    #[serde(default)]
    include_management_events: bool,
}

impl Record for Trail {
    fn is_identified(&self) -> bool {
        has_id(self.resource_id())
    }
}

impl Trail {
    fn resource_id(&self) -> &str {
        if self.trail_arn.is_empty() {
            &self.name
        } else {
            &self.trail_arn
        }
    }

    fn logs_all_management_events(&self) -> bool {
        self.event_selectors
            .iter()
            .any(|s| s.read_write_type == "All" && s.include_management_events)
    }
}

/// Collects findings about audit trail configuration.
pub struct AuditLogCollector {
    api: Arc<dyn DataSource>,
}

impl AuditLogCollector {
    pub fn new(api: Arc<dyn DataSource>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Collector for AuditLogCollector {
    fn source(&self) -> Source {
        Source::AuditLog
    }

    async fn collect(&self, query: &QueryContext) -> CollectorOutcome {
        let document: Document =
            match fetch_document(self.api.as_ref(), Source::AuditLog, query).await {
                Ok(document) => document,
                Err(e) => return CollectorOutcome::Failed(e),
            };

        let (trails, skipped) = decode_records::<Trail>(&document.trail_list);
        info!("Found {} trails", trails.len());

        if trails.is_empty() && skipped == 0 {
            let finding = Finding::new(
                Source::AuditLog,
                query.account.as_str(),
                Severity::High,
                "CloudTrail is not enabled in this account",
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Enable CloudTrail to track API activity across the account");
            return CollectorOutcome::Complete(vec![finding]);
        }

        let mut findings = Vec::new();
        for trail in &trails {
            check_trail(trail, query, &mut findings);
        }

        if findings.is_empty() && skipped == 0 {
            findings.push(
                Finding::new(
                    Source::AuditLog,
                    query.account.as_str(),
                    Severity::Info,
                    "CloudTrail is properly configured",
                    query.now(),
                )
                .with_controls([WELL_ARCHITECTED])
                .with_recommendation("Continue monitoring CloudTrail configuration")
                .informational(),
            );
        }

        finish(Source::AuditLog, findings, skipped)
    }
}

fn check_trail(trail: &Trail, query: &QueryContext, findings: &mut Vec<Finding>) {
    let name = &trail.name;
    let mut push = |severity: Severity, description: String, recommendation: &str| {
        findings.push(
            Finding::new(
                Source::AuditLog,
                trail.resource_id(),
                severity,
                description,
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation(recommendation),
        );
    };

    if !trail.status.is_logging {
        push(
            Severity::High,
            format!("CloudTrail {} is not actively logging", name),
            "Enable logging for the trail",
        );
    } else if let Some(delivered) = trail.status.latest_delivery_time {
        if delivered < query.window_start {
            push(
                Severity::Medium,
                format!(
                    "CloudTrail {} has not delivered logs since {}",
                    name,
                    delivered.format("%Y-%m-%d")
                ),
                "Check the trail's delivery bucket and permissions",
            );
        }
    }

    if !trail.is_multi_region_trail {
        push(
            Severity::Medium,
            format!("CloudTrail {} is not configured for multi-region", name),
            "Enable multi-region logging for complete coverage",
        );
    }

    if !trail.logs_all_management_events() {
        push(
            Severity::Medium,
            format!("CloudTrail {} is not logging all management events", name),
            "Enable logging of all read and write management events",
        );
    }

    if !trail.log_file_validation_enabled {
        push(
            Severity::Low,
            format!("CloudTrail {} does not have log validation enabled", name),
            "Enable log file validation for integrity",
        );
    }

    if !trail.bucket_encrypted && !trail.s3_bucket_name.is_empty() {
        push(
            Severity::Medium,
            format!(
                "S3 bucket {} for CloudTrail {} is not encrypted",
                trail.s3_bucket_name, name
            ),
            "Enable encryption for the trail's S3 bucket",
        );
    }
}
