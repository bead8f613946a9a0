//! Data models for the access review.
//!
//! This module contains the core data structures shared by the collectors,
//! the aggregator, the report writer and the narrative engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// The read-only data source a finding was observed in.
///
/// Variant order is the tie-break order used when sorting a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// Identity users, roles, keys and password policy.
    AccessPolicy,
    /// Organization-wide service control policies.
    OrganizationPolicy,
    /// Aggregated posture findings from the security hub.
    SecurityPosture,
    /// Resources reachable from outside the account.
    ExternalAccess,
    /// Audit trail configuration.
    AuditLog,
}

impl Source {
    /// Every source, in registration order.
    pub const ALL: [Source; 5] = [
        Source::AccessPolicy,
        Source::OrganizationPolicy,
        Source::SecurityPosture,
        Source::ExternalAccess,
        Source::AuditLog,
    ];

    /// Stable kebab-case identifier used in the artifact and snapshot file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::AccessPolicy => "access-policy",
            Source::OrganizationPolicy => "organization-policy",
            Source::SecurityPosture => "security-posture",
            Source::ExternalAccess => "external-access",
            Source::AuditLog => "audit-log",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown source: {}", s))
    }
}

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Awareness only, usually a positive note
    Info,
    /// Hygiene issue
    Low,
    /// Should be planned for remediation
    Medium,
    /// Should be addressed soon
    High,
    /// Requires immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Severity {
    /// Every severity, highest first.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a provider severity label (`HIGH`, `Critical`, `informational`, ...).
    ///
    /// Unknown labels map to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            "info" | "informational" => Severity::Info,
            _ => Severity::Medium,
        }
    }
}

/// Status of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A problem that needs attention.
    Open,
    /// A positive or awareness-only observation.
    Informational,
    /// Synthetic record standing in for a collector failure.
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Open => write!(f, "open"),
            Status::Informational => write!(f, "informational"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// One observation from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub source: Source,
    /// Audited entity (account, role, user, policy, trail).
    pub resource_id: String,
    pub severity: Severity,
    /// Compliance control identifiers, e.g. `CIS 1.2`.
    pub control_mapping: BTreeSet<String>,
    /// Human-readable technical detail. Never empty.
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub status: Status,
    /// Suggested remediation, carried into the narrative only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Finding {
    /// Creates an open finding with no control mapping.
    pub fn new(
        source: Source,
        resource_id: impl Into<String>,
        severity: Severity,
        description: impl Into<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            resource_id: resource_id.into(),
            severity,
            control_mapping: BTreeSet::new(),
            description: description.into(),
            detected_at,
            status: Status::Open,
            recommendation: None,
        }
    }

    /// Adds compliance control identifiers.
    pub fn with_controls<I, S>(mut self, controls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.control_mapping
            .extend(controls.into_iter().map(Into::into));
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    /// Marks the finding as a positive / awareness-only observation.
    pub fn informational(mut self) -> Self {
        self.status = Status::Informational;
        self
    }

    /// Key that must be unique within a report.
    pub fn dedup_key(&self) -> (Source, String, String) {
        (
            self.source,
            self.resource_id.clone(),
            self.description.clone(),
        )
    }
}

/// Why a collector could not produce (all of) its findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionErrorKind {
    /// The source could not be reached or did not answer in time.
    Unavailable,
    /// Required configuration is missing (e.g. no analyzer configured).
    Misconfigured,
    /// The response was malformed, fully or in part.
    Partial,
}

impl fmt::Display for CollectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionErrorKind::Unavailable => write!(f, "unavailable"),
            CollectionErrorKind::Misconfigured => write!(f, "misconfigured"),
            CollectionErrorKind::Partial => write!(f, "partial"),
        }
    }
}

/// Per-source, recoverable collection failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{origin} collection {kind}: {detail}")]
pub struct CollectionError {
    #[serde(rename = "source")]
    pub origin: Source,
    pub kind: CollectionErrorKind,
    pub detail: String,
}

impl CollectionError {
    pub fn new(origin: Source, kind: CollectionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            origin,
            kind,
            detail: detail.into(),
        }
    }

    pub fn unavailable(origin: Source, detail: impl Into<String>) -> Self {
        Self::new(origin, CollectionErrorKind::Unavailable, detail)
    }

    pub fn misconfigured(origin: Source, detail: impl Into<String>) -> Self {
        Self::new(origin, CollectionErrorKind::Misconfigured, detail)
    }

    pub fn partial(origin: Source, detail: impl Into<String>) -> Self {
        Self::new(origin, CollectionErrorKind::Partial, detail)
    }
}

/// The aggregated evidence batch for one run.
///
/// Fields are private so a report cannot change after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    account: String,
    sources: Vec<Source>,
    findings: Vec<Finding>,
    collection_errors: BTreeMap<Source, CollectionError>,
    generated_at: DateTime<Utc>,
}

impl Report {
    /// Only the aggregator builds reports; findings must already be merged and ordered.
    pub(crate) fn new(
        account: String,
        findings: Vec<Finding>,
        collection_errors: BTreeMap<Source, CollectionError>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account,
            sources: Source::ALL.to_vec(),
            findings,
            collection_errors,
            generated_at,
        }
    }

    /// Restrict the report to the sources that were actually attempted.
    pub(crate) fn with_sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        let mut sources: Vec<Source> = sources.into_iter().collect();
        sources.sort();
        sources.dedup();
        self.sources = sources;
        self
    }

    /// Account or scope label the evidence was collected for.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Sources a collector ran for, in canonical order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Sources that were not enabled for this run.
    pub fn not_collected(&self) -> Vec<Source> {
        Source::ALL
            .into_iter()
            .filter(|s| !self.sources.contains(s))
            .collect()
    }

    /// Attempted sources that finished without a collection error.
    pub fn fully_collected(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| !self.collection_errors.contains_key(s))
            .count()
    }

    /// Whether any evidence is missing, from failures or disabled sources.
    pub fn has_caveats(&self) -> bool {
        !self.collection_errors.is_empty() || self.sources.len() < Source::ALL.len()
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn collection_errors(&self) -> &BTreeMap<Source, CollectionError> {
        &self.collection_errors
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Number of findings at the given severity.
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Severities with at least one finding, highest first.
    pub fn severities_present(&self) -> Vec<Severity> {
        Severity::DESCENDING
            .into_iter()
            .filter(|s| self.count_by_severity(*s) > 0)
            .collect()
    }
}

/// Where a narrative's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrativeOrigin {
    Model,
    Fallback,
}

impl fmt::Display for NarrativeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NarrativeOrigin::Model => write!(f, "model"),
            NarrativeOrigin::Fallback => write!(f, "fallback"),
        }
    }
}

/// Governance-facing text derived from a report.
#[derive(Debug, Clone)]
pub struct Narrative {
    text: String,
    origin: NarrativeOrigin,
    report: Arc<Report>,
}

impl Narrative {
    pub(crate) fn new(text: String, origin: NarrativeOrigin, report: Arc<Report>) -> Self {
        Self {
            text,
            origin,
            report,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> NarrativeOrigin {
        self.origin
    }

    /// The report this narrative summarizes.
    pub fn report(&self) -> &Report {
        &self.report
    }
}

/// The durable tabular evidence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    /// Data records written, excluding the header.
    pub rows: usize,
}

impl Artifact {
    /// Number of data rows (excluding the header).
    ///
    /// Counted by the renderer, so quoted fields spanning lines count once.
    pub fn data_rows(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_from_label() {
        assert_eq!(Severity::from_label("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_label("High"), Severity::High);
        assert_eq!(Severity::from_label("Informational"), Severity::Info);
        assert_eq!(Severity::from_label("whatever"), Severity::Medium);
    }

    #[test]
    fn test_source_round_trip_names() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>(), Ok(source));
        }
        assert!("iam".parse::<Source>().is_err());
    }

    #[test]
    fn test_finding_builders() {
        let finding = Finding::new(
            Source::AccessPolicy,
            "alice",
            Severity::High,
            "User alice has console access but no MFA enabled",
            Utc::now(),
        )
        .with_controls(["CIS 1.2", "CIS 1.2"])
        .with_recommendation("Enable MFA");

        assert_eq!(finding.control_mapping.len(), 1);
        assert_eq!(finding.status, Status::Open);
        assert_eq!(finding.recommendation.as_deref(), Some("Enable MFA"));
        assert_eq!(finding.clone().informational().status, Status::Informational);
    }

    #[test]
    fn test_collection_error_display() {
        let err = CollectionError::misconfigured(Source::ExternalAccess, "no analyzer configured");
        assert_eq!(
            err.to_string(),
            "external-access collection misconfigured: no analyzer configured"
        );
    }

    #[test]
    fn test_report_severity_helpers() {
        let now = Utc::now();
        let report = Report::new(
            "123456789012".to_string(),
            vec![
                Finding::new(Source::AccessPolicy, "a", Severity::Critical, "x", now),
                Finding::new(Source::AuditLog, "b", Severity::Medium, "y", now),
                Finding::new(Source::AuditLog, "c", Severity::Medium, "z", now),
            ],
            BTreeMap::new(),
            now,
        );

        assert_eq!(report.count_by_severity(Severity::Medium), 2);
        assert_eq!(
            report.severities_present(),
            vec![Severity::Critical, Severity::Medium]
        );
    }

    #[test]
    fn test_report_source_coverage() {
        let now = Utc::now();
        let mut errors = BTreeMap::new();
        errors.insert(
            Source::AuditLog,
            CollectionError::unavailable(Source::AuditLog, "down"),
        );
        let report = Report::new("acct".to_string(), vec![], errors, now)
            .with_sources([Source::AuditLog, Source::AccessPolicy, Source::AuditLog]);

        assert_eq!(report.sources(), &[Source::AccessPolicy, Source::AuditLog]);
        assert_eq!(
            report.not_collected(),
            vec![
                Source::OrganizationPolicy,
                Source::SecurityPosture,
                Source::ExternalAccess
            ]
        );
        assert_eq!(report.fully_collected(), 1);
        assert!(report.has_caveats());

        let full = Report::new("acct".to_string(), vec![], BTreeMap::new(), now);
        assert_eq!(full.fully_collected(), 5);
        assert!(!full.has_caveats());
    }
}
