//! Organization service-control-policy collector.

use super::{decode_records, fetch_document, finish, has_id, Collector, CollectorOutcome, Record};
use crate::models::{Finding, Severity, Source};
use crate::source::{DataSource, QueryContext};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const WELL_ARCHITECTED: &str = "AWS Well-Architected";

/// Managed policy attached to every root; carries no restrictions.
const FULL_ACCESS_POLICY: &str = "FullAWSAccess";

const SECURITY_SERVICES: [&str; 6] = [
    "cloudtrail",
    "config",
    "guardduty",
    "securityhub",
    "macie",
    "iam",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Document {
    #[serde(default)]
    organization: Option<Value>,
    #[serde(default)]
    policies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Policy {
    name: String,
    /// Policy document as a JSON string, as the provider returns it.
    #[serde(default)]
    content: String,
}

impl Record for Policy {
    fn is_identified(&self) -> bool {
        has_id(&self.name)
    }
}

/// Collects findings about organization service control policies.
pub struct OrganizationPolicyCollector {
    api: Arc<dyn DataSource>,
}

impl OrganizationPolicyCollector {
    pub fn new(api: Arc<dyn DataSource>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Collector for OrganizationPolicyCollector {
    fn source(&self) -> Source {
        Source::OrganizationPolicy
    }

    async fn collect(&self, query: &QueryContext) -> CollectorOutcome {
        let document: Document =
            match fetch_document(self.api.as_ref(), Source::OrganizationPolicy, query).await {
                Ok(document) => document,
                Err(e) => return CollectorOutcome::Failed(e),
            };

        if document.organization.is_none() {
            info!("Account is not part of an organization");
            let finding = Finding::new(
                Source::OrganizationPolicy,
                query.account.as_str(),
                Severity::Info,
                "AWS Organizations is not in use, service control policies are unavailable",
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Consider AWS Organizations to apply guardrails across accounts")
            .informational();
            return CollectorOutcome::Complete(vec![finding]);
        }

        let (policies, skipped) = decode_records::<Policy>(&document.policies);
        let custom: Vec<&Policy> = policies
            .iter()
            .filter(|p| p.name != FULL_ACCESS_POLICY)
            .collect();
        info!("Found {} custom service control policies", custom.len());

        let mut findings = Vec::new();

        if custom.is_empty() {
            findings.push(
                Finding::new(
                    Source::OrganizationPolicy,
                    "organization",
                    Severity::Medium,
                    "No custom SCPs detected in the organization",
                    query.now(),
                )
                .with_controls([WELL_ARCHITECTED])
                .with_recommendation(
                    "Implement SCPs to enforce security guardrails across the organization",
                ),
            );
            return finish(Source::OrganizationPolicy, findings, skipped);
        }

        for policy in &custom {
            check_policy(policy, query, &mut findings);
        }

        if findings.is_empty() {
            findings.push(
                Finding::new(
                    Source::OrganizationPolicy,
                    "organization",
                    Severity::Info,
                    "Organization SCPs follow security best practices",
                    query.now(),
                )
                .with_controls([WELL_ARCHITECTED])
                .with_recommendation("Keep SCPs in line with evolving security needs")
                .informational(),
            );
        }

        finish(Source::OrganizationPolicy, findings, skipped)
    }
}

fn check_policy(policy: &Policy, query: &QueryContext, findings: &mut Vec<Finding>) {
    let name = &policy.name;

    let statements = match serde_json::from_str::<Value>(&policy.content) {
        Ok(doc) => match doc.get("Statement") {
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        },
        Err(e) => {
            debug!("SCP {} has invalid JSON: {}", name, e);
            findings.push(
                Finding::new(
                    Source::OrganizationPolicy,
                    name.as_str(),
                    Severity::Low,
                    format!("SCP \"{}\" has invalid JSON format", name),
                    query.now(),
                )
                .with_controls([WELL_ARCHITECTED])
                .with_recommendation("Review and correct the SCP JSON format"),
            );
            return;
        }
    };

    let mut restricts_root = false;
    let mut protects_security_services = false;

    for statement in &statements {
        let text = statement.to_string();
        let lower = text.to_lowercase();

        if text.contains("aws:PrincipalArn") && lower.contains("root") {
            restricts_root = true;
        }
        if SECURITY_SERVICES.iter().any(|service| lower.contains(service)) {
            protects_security_services = true;
        }
    }

    if !restricts_root {
        findings.push(
            Finding::new(
                Source::OrganizationPolicy,
                name.as_str(),
                Severity::Medium,
                format!("SCP \"{}\" does not appear to restrict root user activities", name),
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Deny actions for root users in member accounts"),
        );
    }

    if !protects_security_services {
        findings.push(
            Finding::new(
                Source::OrganizationPolicy,
                name.as_str(),
                Severity::Low,
                format!("SCP \"{}\" does not appear to protect security services", name),
                query.now(),
            )
            .with_controls([WELL_ARCHITECTED])
            .with_recommendation("Prevent disabling of security services"),
        );
    }
}
