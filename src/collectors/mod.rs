//! Finding collectors.
//!
//! Each collector queries one read-only data source and maps the raw
//! provider output onto [`Finding`]s. Collectors never fail their caller:
//! every problem is folded into a [`CollectorOutcome`].

pub mod access_policy;
pub mod audit_log;
pub mod external_access;
pub mod organization_policy;
pub mod security_posture;

pub use access_policy::AccessPolicyCollector;
pub use audit_log::AuditLogCollector;
pub use external_access::ExternalAccessCollector;
pub use organization_policy::OrganizationPolicyCollector;
pub use security_posture::SecurityPostureCollector;

use crate::error::SourceError;
use crate::models::{CollectionError, Finding, Source};
use crate::source::{DataSource, QueryContext};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Result of one collector run.
///
/// A failed run carries no findings, even when some records were readable.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorOutcome {
    /// Every record was mapped.
    Complete(Vec<Finding>),
    /// The source could not be collected in full.
    Failed(CollectionError),
}

impl CollectorOutcome {
    /// Split into the findings and the optional collection error.
    pub fn into_parts(self) -> (Vec<Finding>, Option<CollectionError>) {
        match self {
            CollectorOutcome::Complete(findings) => (findings, None),
            CollectorOutcome::Failed(error) => (Vec::new(), Some(error)),
        }
    }

    /// Findings collected, empty for a failed run.
    pub fn findings(&self) -> &[Finding] {
        match self {
            CollectorOutcome::Complete(findings) => findings,
            CollectorOutcome::Failed(_) => &[],
        }
    }

    pub fn error(&self) -> Option<&CollectionError> {
        match self {
            CollectorOutcome::Complete(_) => None,
            CollectorOutcome::Failed(error) => Some(error),
        }
    }
}

/// A single read-only evidence collector.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The data source this collector queries.
    fn source(&self) -> Source;

    /// Collect findings. Must not panic or return early with an error.
    async fn collect(&self, query: &QueryContext) -> CollectorOutcome;
}

/// Build the fixed collector list, restricted to `enabled` sources.
pub fn registry(api: Arc<dyn DataSource>, enabled: &[Source]) -> Vec<Arc<dyn Collector>> {
    let all: Vec<Arc<dyn Collector>> = vec![
        Arc::new(AccessPolicyCollector::new(api.clone())),
        Arc::new(OrganizationPolicyCollector::new(api.clone())),
        Arc::new(SecurityPostureCollector::new(api.clone())),
        Arc::new(ExternalAccessCollector::new(api.clone())),
        Arc::new(AuditLogCollector::new(api)),
    ];

    all.into_iter()
        .filter(|c| enabled.contains(&c.source()))
        .collect()
}

/// Map a raw source failure onto a collection error.
pub(crate) fn source_failure(source: Source, err: SourceError) -> CollectionError {
    match err {
        SourceError::Unreachable(detail) => CollectionError::unavailable(source, detail),
        SourceError::NotConfigured(detail) => CollectionError::misconfigured(source, detail),
        SourceError::Malformed(detail) => CollectionError::partial(source, detail),
    }
}

/// Fetch and decode the top-level provider document.
pub(crate) async fn fetch_document<T: DeserializeOwned>(
    api: &dyn DataSource,
    source: Source,
    query: &QueryContext,
) -> Result<T, CollectionError> {
    let raw = api
        .fetch(source, query)
        .await
        .map_err(|e| source_failure(source, e))?;

    serde_json::from_value(raw)
        .map_err(|e| CollectionError::partial(source, format!("malformed response: {}", e)))
}

/// A provider record that names the resource its findings are about.
pub(crate) trait Record: DeserializeOwned {
    /// Whether every identifier a finding could be keyed on is present.
    fn is_identified(&self) -> bool;
}

pub(crate) fn has_id(id: &str) -> bool {
    !id.trim().is_empty()
}

/// Decode a list of raw records, keeping the ones that parse and are identified.
///
/// Returns the decoded records and the number that were skipped.
pub(crate) fn decode_records<T: Record>(records: &[Value]) -> (Vec<T>, usize) {
    let mut decoded = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        match serde_json::from_value::<T>(record.clone()) {
            Ok(value) if value.is_identified() => decoded.push(value),
            _ => skipped += 1,
        }
    }

    (decoded, skipped)
}

/// Wrap mapped findings. Any skipped record fails the whole source as partial.
pub(crate) fn finish(source: Source, findings: Vec<Finding>, skipped: usize) -> CollectorOutcome {
    if skipped == 0 {
        CollectorOutcome::Complete(findings)
    } else {
        warn!(
            "Discarding {} {} findings after {} unusable record(s)",
            findings.len(),
            source,
            skipped
        );
        CollectorOutcome::Failed(CollectionError::partial(
            source,
            format!("{} malformed record(s) skipped", skipped),
        ))
    }
}
