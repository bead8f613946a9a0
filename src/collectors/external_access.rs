//! External-access analyzer collector.

use super::{decode_records, fetch_document, finish, has_id, Collector, CollectorOutcome, Record};
use crate::models::{CollectionError, Finding, Severity, Source};
use crate::source::{DataSource, QueryContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const CONTROLS: [&str; 2] = ["AWS Well-Architected", "CIS AWS Foundations"];

/// Resource types whose external exposure is rated high even when not public.
const SENSITIVE_RESOURCE_TYPES: [&str; 2] = ["AWS::S3::Bucket", "AWS::KMS::Key"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    analyzers: Vec<Analyzer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Analyzer {
    name: String,
    #[serde(default)]
    findings: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzerFinding {
    resource: String,
    #[serde(default = "default_resource_type")]
    resource_type: String,
    #[serde(default)]
    is_public: bool,
    #[serde(default = "default_status")]
    status: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

fn default_resource_type() -> String {
    "Unknown".to_string()
}

fn default_status() -> String {
    "ACTIVE".to_string()
}

impl Record for AnalyzerFinding {
    fn is_identified(&self) -> bool {
        has_id(&self.resource)
    }
}

impl AnalyzerFinding {
    fn severity(&self) -> Severity {
        if self.is_public {
            Severity::Critical
        } else if SENSITIVE_RESOURCE_TYPES.contains(&self.resource_type.as_str()) {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

/// Collects resources shared outside the account.
pub struct ExternalAccessCollector {
    api: Arc<dyn DataSource>,
}

impl ExternalAccessCollector {
    pub fn new(api: Arc<dyn DataSource>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Collector for ExternalAccessCollector {
    fn source(&self) -> Source {
        Source::ExternalAccess
    }

    async fn collect(&self, query: &QueryContext) -> CollectorOutcome {
        let document: Document =
            match fetch_document(self.api.as_ref(), Source::ExternalAccess, query).await {
                Ok(document) => document,
                Err(e) => return CollectorOutcome::Failed(e),
            };

        if document.analyzers.is_empty() {
            warn!("No access analyzer configured");
            return CollectorOutcome::Failed(CollectionError::misconfigured(
                Source::ExternalAccess,
                "no access analyzer is configured for this account",
            ));
        }

        let mut findings = Vec::new();
        let mut skipped = 0;

        for analyzer in &document.analyzers {
            if !has_id(&analyzer.name) {
                skipped += 1;
                continue;
            }
            let (records, bad) = decode_records::<AnalyzerFinding>(&analyzer.findings);
            skipped += bad;

            let active: Vec<&AnalyzerFinding> = records
                .iter()
                .filter(|f| f.status.eq_ignore_ascii_case("ACTIVE"))
                .collect();
            info!(
                "Found {} active findings for analyzer {}",
                active.len(),
                analyzer.name
            );

            for record in &active {
                findings.push(map_finding(record, query));
            }

            if active.is_empty() && bad == 0 {
                findings.push(
                    Finding::new(
                        Source::ExternalAccess,
                        analyzer.name.as_str(),
                        Severity::Info,
                        "No external access findings detected by IAM Access Analyzer",
                        query.now(),
                    )
                    .with_controls([CONTROLS[0]])
                    .with_recommendation("Continue monitoring with IAM Access Analyzer")
                    .informational(),
                );
            }
        }

        finish(Source::ExternalAccess, findings, skipped)
    }
}

fn map_finding(record: &AnalyzerFinding, query: &QueryContext) -> Finding {
    let exposure = if record.is_public {
        "is publicly accessible"
    } else {
        "has external access that may not be intended"
    };

    Finding::new(
        Source::ExternalAccess,
        record.resource.as_str(),
        record.severity(),
        format!("{} {} {}", record.resource_type, record.resource, exposure),
        record.created_at.unwrap_or_else(|| query.now()),
    )
    .with_controls(CONTROLS)
    .with_recommendation(format!(
        "Review the permissions for this {} and restrict access if unintended",
        record.resource_type
    ))
}
