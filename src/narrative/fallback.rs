//! Deterministic fallback narrative.
//!
//! Used whenever the model path fails. The text depends on nothing but the
//! report, so the same report always yields the same narrative.

use crate::analysis::top_controls;
use crate::models::{Report, Severity, Status};

/// Sentence every fallback narrative carries.
pub const AI_UNAVAILABLE_NOTE: &str =
    "AI summarization was unavailable for this run; this narrative was generated deterministically from the collected evidence.";

const MAX_CONTROLS: usize = 5;
const MAX_KEY_ISSUES: usize = 5;
const MAX_POSITIVES: usize = 3;

/// Synthesize a narrative from report fields alone.
pub fn synthesize_fallback(report: &Report) -> String {
    let findings = report.findings();
    let mut narrative = String::new();

    narrative.push_str(&format!(
        "Access Review Report - {}\n",
        report.account()
    ));
    narrative.push_str(&format!(
        "Generated: {}\n\n",
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    narrative.push_str("EXECUTIVE SUMMARY\n");
    narrative.push_str(&format!(
        "This automated review fully collected {} of {} enabled evidence sources and identified {} findings.\n",
        report.fully_collected(),
        report.sources().len(),
        findings.len()
    ));
    let skipped = report.not_collected();
    if !skipped.is_empty() {
        narrative.push_str(&format!(
            "{} evidence source(s) were not enabled for this run.\n",
            skipped.len()
        ));
    }
    narrative.push('\n');

    narrative.push_str("FINDINGS SUMMARY\n");
    narrative.push_str(&format!("Total findings: {}\n", findings.len()));
    for severity in Severity::DESCENDING {
        narrative.push_str(&format!(
            "{}: {} - {}\n",
            capitalize(severity.as_str()),
            report.count_by_severity(severity),
            urgency(severity)
        ));
    }

    let present: Vec<&str> = report
        .severities_present()
        .into_iter()
        .map(|s| s.as_str())
        .collect();
    narrative.push_str(&format!(
        "Severities present: {}\n",
        if present.is_empty() {
            "none".to_string()
        } else {
            present.join(", ")
        }
    ));

    let controls = top_controls(findings, MAX_CONTROLS);
    if !controls.is_empty() {
        narrative.push_str("\nTOP CONTROL MAPPINGS\n");
        for (control, count) in &controls {
            narrative.push_str(&format!("{}: {} findings\n", control, count));
        }
    }

    let key_issues: Vec<_> = findings
        .iter()
        .filter(|f| f.status == Status::Open && f.severity >= Severity::High)
        .collect();
    if !key_issues.is_empty() {
        narrative.push_str("\nKEY ISSUES REQUIRING ATTENTION\n");
        for finding in key_issues.iter().take(MAX_KEY_ISSUES) {
            narrative.push_str(&format!(
                "- [{}] {} ({}: {})\n",
                finding.severity, finding.description, finding.source, finding.resource_id
            ));
        }
        if key_issues.len() > MAX_KEY_ISSUES {
            narrative.push_str(&format!(
                "... and {} more critical or high severity issues.\n",
                key_issues.len() - MAX_KEY_ISSUES
            ));
        }
    }

    let positives: Vec<_> = findings
        .iter()
        .filter(|f| f.status == Status::Informational)
        .collect();
    if !positives.is_empty() {
        narrative.push_str("\nPOSITIVE SECURITY FINDINGS\n");
        for finding in positives.iter().take(MAX_POSITIVES) {
            narrative.push_str(&format!("- {}\n", finding.description));
        }
        if positives.len() > MAX_POSITIVES {
            narrative.push_str(&format!(
                "... and {} more positive findings.\n",
                positives.len() - MAX_POSITIVES
            ));
        }
    }

    if report.has_caveats() {
        narrative.push_str("\nCOLLECTION CAVEATS\n");
        narrative.push_str("Evidence from the following sources is missing or incomplete:\n");
        for (source, err) in report.collection_errors() {
            narrative.push_str(&format!("- {}: {} ({})\n", source, err.kind, err.detail));
        }
        for source in skipped {
            narrative.push_str(&format!("- {}: not enabled for this run\n", source));
        }
    }

    narrative.push_str("\nNOTE\n");
    narrative.push_str(AI_UNAVAILABLE_NOTE);
    narrative.push('\n');

    narrative.push_str(
        "\nRECOMMENDATIONS\n\
         1. Address all Critical and High findings as soon as possible\n\
         2. Create a remediation plan for Medium findings\n\
         3. Resolve collection caveats so the next review covers every source\n\
         4. For detailed findings, see the attached CSV report\n",
    );

    narrative
}

fn urgency(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Requires immediate attention",
        Severity::High => "Should be addressed soon",
        Severity::Medium => "Should be planned for remediation",
        Severity::Low => "Consider addressing when convenient",
        Severity::Info => "No action needed",
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
