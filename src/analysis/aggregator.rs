//! Evidence aggregation.
//!
//! Runs the collectors concurrently, folds their outcomes into one
//! deduplicated, deterministically ordered [`Report`], and provides the
//! grouping helpers the narrative engine builds on.

use crate::collectors::{Collector, CollectorOutcome};
use crate::error::AggregationError;
use crate::models::{CollectionError, Finding, Report, Severity, Source, Status};
use crate::source::QueryContext;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Run every collector as its own task, each bounded by `wait`.
///
/// A collector that exceeds its wait or panics is reported as `unavailable`.
/// Output order follows the collector list.
pub async fn run_collectors(
    collectors: &[Arc<dyn Collector>],
    query: &QueryContext,
    wait: Duration,
) -> Vec<(Source, CollectorOutcome)> {
    let query = Arc::new(query.clone());

    let handles: Vec<_> = collectors
        .iter()
        .map(|collector| {
            let collector = Arc::clone(collector);
            let query = Arc::clone(&query);
            tokio::spawn(async move {
                let source = collector.source();
                debug!("Collector {} started", source);

                match tokio::time::timeout(wait, collector.collect(&query)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!("Collector {} exceeded {:?}", source, wait);
                        CollectorOutcome::Failed(CollectionError::unavailable(
                            source,
                            format!("no response within {}s", wait.as_secs_f64()),
                        ))
                    }
                }
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    collectors
        .iter()
        .zip(results)
        .map(|(collector, result)| {
            let source = collector.source();
            let outcome = result.unwrap_or_else(|e| {
                error!("Collector {} task failed: {}", source, e);
                CollectorOutcome::Failed(CollectionError::unavailable(
                    source,
                    format!("collector task failed: {}", e),
                ))
            });
            match outcome.error() {
                Some(err) => warn!("Collector {} finished with error: {}", source, err),
                None => info!(
                    "Collector {} finished with {} findings",
                    source,
                    outcome.findings().len()
                ),
            }
            (source, outcome)
        })
        .collect()
}

/// Fold collector outcomes into a report.
///
/// Always yields a report when the collectors honour their contract, even
/// if every one of them failed.
pub fn aggregate(
    account: &str,
    outputs: Vec<(Source, CollectorOutcome)>,
    generated_at: DateTime<Utc>,
) -> Result<Report, AggregationError> {
    let mut collection_errors = BTreeMap::new();
    let mut all_findings = Vec::new();
    let mut seen = Vec::with_capacity(outputs.len());

    for (source, outcome) in outputs {
        if seen.contains(&source) {
            return Err(AggregationError::DuplicateSource(source));
        }
        seen.push(source);

        let (findings, collection_error) = outcome.into_parts();
        for finding in &findings {
            validate(source, finding)?;
        }
        all_findings.extend(findings);

        if let Some(err) = collection_error {
            collection_errors.insert(source, err);
        }
    }

    let total = all_findings.len();
    let mut findings = merge_findings(all_findings);
    sort_findings(&mut findings);

    info!(
        "Aggregated {} findings into {} ({} collection errors)",
        total,
        findings.len(),
        collection_errors.len()
    );

    Ok(Report::new(
        account.to_string(),
        findings,
        collection_errors,
        generated_at,
    )
    .with_sources(seen))
}

fn validate(source: Source, finding: &Finding) -> Result<(), AggregationError> {
    if finding.description.trim().is_empty() {
        return Err(AggregationError::EmptyField {
            source_name: source,
            field: "description",
        });
    }
    if finding.resource_id.trim().is_empty() {
        return Err(AggregationError::EmptyField {
            source_name: source,
            field: "resource_id",
        });
    }
    if finding.status == Status::Error {
        return Err(AggregationError::SyntheticFinding(source));
    }
    Ok(())
}

/// Merge findings sharing source, resource and description.
///
/// The merged finding keeps the highest severity, the union of control
/// mappings, the earliest detection time and the first recommendation; it
/// stays open if any duplicate was open.
pub fn merge_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
    let mut index: HashMap<(Source, String, String), usize> = HashMap::new();

    for finding in findings {
        match index.get(&finding.dedup_key()) {
            Some(&at) => merge_into(&mut merged[at], finding),
            None => {
                index.insert(finding.dedup_key(), merged.len());
                merged.push(finding);
            }
        }
    }

    merged
}

fn merge_into(target: &mut Finding, other: Finding) {
    target.severity = target.severity.max(other.severity);
    target.control_mapping.extend(other.control_mapping);
    target.detected_at = target.detected_at.min(other.detected_at);
    target.status = target.status.min(other.status);
    if target.recommendation.is_none() {
        target.recommendation = other.recommendation;
    }
}

/// Sort by severity (critical first), then source, then resource.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.resource_id.cmp(&b.resource_id))
            .then_with(|| a.description.cmp(&b.description))
    });
}

/// Group findings by severity, highest first.
pub fn group_by_severity(findings: &[Finding]) -> Vec<(Severity, Vec<&Finding>)> {
    Severity::DESCENDING
        .into_iter()
        .map(|severity| {
            let group: Vec<&Finding> = findings.iter().filter(|f| f.severity == severity).collect();
            (severity, group)
        })
        .filter(|(_, group)| !group.is_empty())
        .collect()
}

/// Group findings by control identifier. Unmapped findings go under `unmapped`.
pub fn group_by_control<'a>(findings: &[&'a Finding]) -> BTreeMap<String, Vec<&'a Finding>> {
    let mut grouped: BTreeMap<String, Vec<&'a Finding>> = BTreeMap::new();

    for &finding in findings {
        if finding.control_mapping.is_empty() {
            grouped.entry("unmapped".to_string()).or_default().push(finding);
        }
        for control in &finding.control_mapping {
            grouped.entry(control.clone()).or_default().push(finding);
        }
    }

    grouped
}

/// The `n` most referenced controls across non-informational findings.
///
/// Ties break alphabetically so the result is stable.
pub fn top_controls(findings: &[Finding], n: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

    for finding in findings.iter().filter(|f| f.status == Status::Open) {
        for control in &finding.control_mapping {
            *counts.entry(control.as_str()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(control, count)| (control.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CollectionErrorKind;
    use async_trait::async_trait;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn finding(source: Source, resource: &str, severity: Severity, controls: &[&str]) -> Finding {
        Finding::new(
            source,
            resource,
            severity,
            format!("{} issue", resource),
            at("2025-04-01T00:00:00Z"),
        )
        .with_controls(controls.iter().copied())
    }

    struct FixedCollector {
        source: Source,
        outcome: CollectorOutcome,
        delay: Duration,
    }

    #[async_trait]
    impl Collector for FixedCollector {
        fn source(&self) -> Source {
            self.source
        }

        async fn collect(&self, _query: &QueryContext) -> CollectorOutcome {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    #[test]
    fn test_merge_keeps_highest_severity_and_union_of_controls() {
        let mut first = finding(Source::AccessPolicy, "alice", Severity::Medium, &["A"]);
        first.detected_at = at("2025-04-01T10:00:00Z");
        let mut second = finding(Source::AccessPolicy, "alice", Severity::Critical, &["B"]);
        second.detected_at = at("2025-03-30T10:00:00Z");

        let merged = merge_findings(vec![first, second]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity, Severity::Critical);
        assert_eq!(
            merged[0].control_mapping.iter().cloned().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string()]
        );
        assert_eq!(merged[0].detected_at, at("2025-03-30T10:00:00Z"));
    }

    #[test]
    fn test_distinct_sources_are_not_merged() {
        let merged = merge_findings(vec![
            finding(Source::AccessPolicy, "alice", Severity::High, &[]),
            finding(Source::SecurityPosture, "alice", Severity::High, &[]),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_sort_order() {
        let mut findings = vec![
            finding(Source::AuditLog, "trail", Severity::Medium, &[]),
            finding(Source::AccessPolicy, "zed", Severity::Critical, &[]),
            finding(Source::AccessPolicy, "bob", Severity::Medium, &[]),
            finding(Source::AccessPolicy, "amy", Severity::Critical, &[]),
        ];
        sort_findings(&mut findings);

        let order: Vec<&str> = findings.iter().map(|f| f.resource_id.as_str()).collect();
        assert_eq!(order, vec!["amy", "zed", "bob", "trail"]);
    }

    #[test]
    fn test_all_collectors_failed_still_yields_report() {
        let outputs = Source::ALL
            .into_iter()
            .map(|s| {
                (
                    s,
                    CollectorOutcome::Failed(CollectionError::unavailable(s, "down")),
                )
            })
            .collect();

        let report = aggregate("acct", outputs, Utc::now()).unwrap();

        assert!(report.findings().is_empty());
        assert_eq!(report.collection_errors().len(), 5);
        assert!(Source::ALL
            .iter()
            .all(|s| report.collection_errors().contains_key(s)));
    }

    #[test]
    fn test_partial_failure_contributes_no_findings() {
        let outputs = vec![
            (
                Source::AccessPolicy,
                CollectorOutcome::Complete(vec![finding(
                    Source::AccessPolicy,
                    "alice",
                    Severity::High,
                    &[],
                )]),
            ),
            (
                Source::AuditLog,
                CollectorOutcome::Failed(CollectionError::partial(
                    Source::AuditLog,
                    "1 malformed record(s) skipped",
                )),
            ),
        ];

        let report = aggregate("acct", outputs, Utc::now()).unwrap();
        assert_eq!(report.findings().len(), 1);
        assert!(report.findings().iter().all(|f| f.source != Source::AuditLog));
        assert_eq!(
            report.collection_errors()[&Source::AuditLog].kind,
            CollectionErrorKind::Partial
        );
    }

    #[test]
    fn test_invariant_violations_are_errors() {
        let mut empty = finding(Source::AuditLog, "trail", Severity::Low, &[]);
        empty.description = "  ".to_string();
        let result = aggregate(
            "acct",
            vec![(Source::AuditLog, CollectorOutcome::Complete(vec![empty]))],
            Utc::now(),
        );
        assert!(matches!(result, Err(AggregationError::EmptyField { .. })));

        let result = aggregate(
            "acct",
            vec![
                (Source::AuditLog, CollectorOutcome::Complete(Vec::new())),
                (Source::AuditLog, CollectorOutcome::Complete(Vec::new())),
            ],
            Utc::now(),
        );
        assert!(matches!(result, Err(AggregationError::DuplicateSource(_))));
    }

    #[test]
    fn test_top_controls_ignores_informational() {
        let findings = vec![
            finding(Source::AccessPolicy, "a", Severity::High, &["CIS 1.2", "WA"]),
            finding(Source::AccessPolicy, "b", Severity::Medium, &["WA"]),
            finding(Source::AuditLog, "c", Severity::Info, &["Positive"]).informational(),
        ];

        let top = top_controls(&findings, 5);
        assert_eq!(
            top,
            vec![("WA".to_string(), 2), ("CIS 1.2".to_string(), 1)]
        );
    }

    #[test]
    fn test_grouping_helpers() {
        let findings = vec![
            finding(Source::AccessPolicy, "a", Severity::High, &["X"]),
            finding(Source::AccessPolicy, "b", Severity::High, &[]),
            finding(Source::AuditLog, "c", Severity::Low, &["X", "Y"]),
        ];

        let by_severity = group_by_severity(&findings);
        assert_eq!(by_severity.len(), 2);
        assert_eq!(by_severity[0].0, Severity::High);
        assert_eq!(by_severity[0].1.len(), 2);

        let all: Vec<&Finding> = findings.iter().collect();
        let by_control = group_by_control(&all);
        assert_eq!(by_control["X"].len(), 2);
        assert_eq!(by_control["unmapped"].len(), 1);
    }

    #[tokio::test]
    async fn test_slow_collector_is_unavailable() {
        let collectors: Vec<Arc<dyn Collector>> = vec![
            Arc::new(FixedCollector {
                source: Source::AccessPolicy,
                outcome: CollectorOutcome::Complete(vec![finding(
                    Source::AccessPolicy,
                    "alice",
                    Severity::High,
                    &[],
                )]),
                delay: Duration::from_millis(0),
            }),
            Arc::new(FixedCollector {
                source: Source::AuditLog,
                outcome: CollectorOutcome::Complete(Vec::new()),
                delay: Duration::from_secs(5),
            }),
        ];

        let query = QueryContext::new("acct", Utc::now(), 7);
        let outputs = run_collectors(&collectors, &query, Duration::from_millis(100)).await;

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].1.findings().len(), 1);
        assert_eq!(
            outputs[1].1.error().map(|e| e.kind),
            Some(CollectionErrorKind::Unavailable)
        );
    }
}
