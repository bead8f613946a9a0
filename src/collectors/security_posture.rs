//! Security-posture hub collector.
//!
//! Reads the hub's enabled standards and its active, new, high/critical
//! identity findings. Findings the hub relays from other products keep the
//! originating source so they merge with that source's own observations.

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
const MAX_FINDINGS: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Document {
    #[serde(default)]
    standards_subscriptions: Vec<Value>,
    #[serde(default)]
    findings: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HubFinding {
    #[serde(default)]
    product_name: String,
    severity: HubSeverity,
    #[serde(default)]
    resources: Vec<HubResource>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    remediation: Option<Remediation>,
    #[serde(default)]
    compliance: Option<Compliance>,
    #[serde(default)]
    first_observed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_record_state")]
    record_state: String,
    #[serde(default)]
    workflow: Option<Workflow>,
}

impl Record for HubFinding {
    fn is_identified(&self) -> bool {
        has_id(&self.description) || has_id(&self.title)
    }
}

fn default_record_state() -> String {
    "ACTIVE".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HubSeverity {
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HubResource {
    #[serde(rename = "Type", default)]
    resource_type: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Remediation {
    recommendation: Option<RecommendationText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecommendationText {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Compliance {
    #[serde(default)]
    related_requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Workflow {
    status: String,
}

impl HubFinding {
    /// Active, new, high/critical finding on an identity resource.
    fn in_scope(&self) -> bool {
        let severity = Severity::from_label(&self.severity.label);
        let new = self
            .workflow
            .as_ref()
            .map_or(true, |w| w.status.eq_ignore_ascii_case("NEW"));
        let identity = self
            .resources
            .first()
            .map_or(false, |r| r.resource_type.starts_with("AwsIam"));

        self.record_state.eq_ignore_ascii_case("ACTIVE")
            && new
            && severity >= Severity::High
            && identity
    }

    fn origin(&self) -> Source {
        match self.product_name.as_str() {
            "IAM Access Analyzer" => Source::ExternalAccess,
            "IAM" => Source::AccessPolicy,
            _ => Source::SecurityPosture,
        }
    }
}

/// Collects findings from the security-posture hub.
pub struct SecurityPostureCollector {
    api: Arc<dyn DataSource>,
}

impl SecurityPostureCollector {
    pub fn new(api: Arc<dyn DataSource>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Collector for SecurityPostureCollector {
    fn source(&self) -> Source {
        Source::SecurityPosture
    }

    async fn collect(&self, query: &QueryContext) -> CollectorOutcome {
        let document: Document =
            match fetch_document(self.api.as_ref(), Source::SecurityPosture, query).await {
                Ok(document) => document,
                Err(e) => return CollectorOutcome::Failed(e),
            };

        if document.standards_subscriptions.is_empty() {
            info!("Security hub has no enabled standards");
            let finding = Finding::new(
                Source::SecurityPosture,
                query.account.as_str(),
                Severity::High,
                "Security Hub is not enabled in this account",
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Enable Security Hub to improve security posture visibility");
            return CollectorOutcome::Complete(vec![finding]);
        }

        let (hub_findings, mut skipped) = decode_records::<HubFinding>(&document.findings);

        let mut findings = Vec::new();
        for hub in hub_findings.iter().filter(|f| f.in_scope()).take(MAX_FINDINGS) {
            match map_finding(hub, query) {
                Some(finding) => findings.push(finding),
                None => skipped += 1,
            }
        }
        info!("Mapped {} security hub findings", findings.len());

        if findings.is_empty() && skipped == 0 {
            findings.push(
                Finding::new(
                    Source::SecurityPosture,
                    query.account.as_str(),
                    Severity::Info,
                    "No high/critical IAM-related findings detected",
                    query.now(),
                )
                .with_controls([WELL_ARCHITECTED])
                .with_recommendation("Continue monitoring with Security Hub")
                .informational(),
            );
        }

        finish(Source::SecurityPosture, findings, skipped)
    }
}

/// Map a hub record, or `None` when it lacks a usable description.
fn map_finding(hub: &HubFinding, query: &QueryContext) -> Option<Finding> {
    let description = if hub.description.trim().is_empty() {
        hub.title.trim()
    } else {
        hub.description.trim()
    };
    if description.is_empty() {
        return None;
    }

    let resource_id = hub
        .resources
        .first()
        .map(|r| r.id.as_str())
        .filter(|id| !id.is_empty())
        .unwrap_or("unknown");

    let recommendation = hub
        .remediation
        .as_ref()
        .and_then(|r| r.recommendation.as_ref())
        .and_then(|r| r.text.clone())
        .unwrap_or_else(|| "Review finding in the Security Hub console".to_string());

    let controls = hub
        .compliance
        .as_ref()
        .map(|c| c.related_requirements.clone())
        .unwrap_or_default();

    Some(
        Finding::new(
            hub.origin(),
            resource_id,
            Severity::from_label(&hub.severity.label),
            description,
            hub.first_observed_at.unwrap_or_else(|| query.now()),
        )
        .with_controls(controls)
        .with_recommendation(recommendation),
    )
}
