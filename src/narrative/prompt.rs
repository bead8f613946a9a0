//! Prompt construction.

use crate::analysis::{group_by_control, group_by_severity};
use crate::models::{Report, Severity};

/// Opening instruction. Also used to detect a model echoing its input.
pub const PREAMBLE: &str = "You are analyzing cloud security posture evidence collected for a compliance review.";

/// Opening tag of the findings block.
pub const FINDINGS_OPEN: &str = "<findings>";
pub const FINDINGS_CLOSE: &str = "</findings>";

/// Line prefixes of the findings block.
pub const SEVERITY_HEADING: &str = "## Severity: ";
pub const CONTROL_LABEL: &str = "Control: ";

/// Findings listed per (severity, control) group before summarizing the rest.
const MAX_PER_GROUP: usize = 5;

/// Build the model prompt for a report.
///
/// Findings are grouped by severity, then by control mapping. Collection
/// errors are listed as caveats so the narrative cannot silently omit a
/// source that failed.
pub fn build_prompt(report: &Report) -> String {
    let mut prompt = String::new();

    prompt.push_str(PREAMBLE);
    prompt.push_str("\nGenerate a concise, professional security report based on the following findings.\n\n");
    prompt.push_str(FINDINGS_OPEN);
    prompt.push('\n');

    prompt.push_str(&format!("# Security Findings for {}\n", report.account()));
    prompt.push_str(&format!(
        "Generated: {}\n\n",
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    prompt.push_str(&format!("Total findings: {}\n", report.findings().len()));
    for severity in Severity::DESCENDING {
        prompt.push_str(&format!(
            "- {}: {}\n",
            severity.as_str(),
            report.count_by_severity(severity)
        ));
    }

    for (severity, findings) in group_by_severity(report.findings()) {
        prompt.push_str(&format!("\n{}{}\n", SEVERITY_HEADING, severity.as_str()));

        for (control, group) in group_by_control(&findings) {
            prompt.push_str(&format!("{}{}\n", CONTROL_LABEL, control));
            for finding in group.iter().take(MAX_PER_GROUP) {
                prompt.push_str(&format!(
                    "  - [{}] {} ({}: {})\n",
                    finding.status, finding.description, finding.source, finding.resource_id
                ));
            }
            if group.len() > MAX_PER_GROUP {
                prompt.push_str(&format!(
                    "  - ... and {} more {} findings\n",
                    group.len() - MAX_PER_GROUP,
                    control
                ));
            }
        }
    }

    if report.has_caveats() {
        prompt.push_str("\n## Collection caveats\n");
        prompt.push_str("The following sources could not be fully collected; their findings may be missing:\n");
        for (source, err) in report.collection_errors() {
            prompt.push_str(&format!("  - {}: {} ({})\n", source, err.kind, err.detail));
        }
        for source in report.not_collected() {
            prompt.push_str(&format!("  - {}: not enabled for this run\n", source));
        }
    }

    prompt.push_str(FINDINGS_CLOSE);
    prompt.push_str(
        "\n\nYour report should include:\n\
         1. An executive summary of the security posture\n\
         2. Analysis of the most critical findings\n\
         3. Clear, actionable recommendations\n\
         4. Compliance implications\n\
         5. A note on any collection caveats listed above\n",
    );

    prompt
}
