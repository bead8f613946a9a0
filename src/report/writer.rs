//! CSV evidence artifact.
//!
//! The artifact is a pure function of the report: identical reports render
//! to identical bytes. Each collection error is written as an `error`-status
//! row after the findings so the evidence record shows the gap.

use crate::error::WriteError;
use crate::models::{Artifact, Finding, Report, Severity, Status};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed column schema.
pub const COLUMNS: [&str; 7] = [
    "source",
    "resource_id",
    "severity",
    "control_mapping",
    "description",
    "detected_at",
    "status",
];

pub const CONTENT_TYPE: &str = "text/csv";

/// Resource id used for collection-error rows.
const ERROR_ROW_RESOURCE: &str = "collector";

/// Artifact file name, derived from the report's generation time.
pub fn artifact_name(report: &Report) -> String {
    format!(
        "access-review-{}.csv",
        report.generated_at().format("%Y-%m-%d-%H-%M-%S")
    )
}

/// Render the report as CSV bytes.
pub fn render_csv(report: &Report) -> Vec<u8> {
    render_records(report).0
}

/// Render the CSV text and count the data records written.
fn render_records(report: &Report) -> (Vec<u8>, usize) {
    let mut output = String::new();
    let mut rows = 0;

    push_row(&mut output, COLUMNS.iter().map(|c| c.to_string()));

    for finding in report.findings() {
        push_row(&mut output, finding_row(finding));
        rows += 1;
    }

    for (source, err) in report.collection_errors() {
        rows += 1;
        push_row(
            &mut output,
            [
                source.to_string(),
                ERROR_ROW_RESOURCE.to_string(),
                Severity::Info.to_string(),
                String::new(),
                format!("{}: {}", err.kind, err.detail),
                timestamp(report.generated_at()),
                Status::Error.to_string(),
            ],
        );
    }

    (output.into_bytes(), rows)
}

/// Render the report into an artifact without touching any sink.
pub fn render(report: &Report) -> Artifact {
    let (bytes, rows) = render_records(report);
    Artifact {
        name: artifact_name(report),
        content_type: CONTENT_TYPE,
        bytes,
        rows,
    }
}

/// Write the artifact to `sink`. Sink failures are returned, never swallowed.
pub fn write<W: Write>(report: &Report, sink: &mut W) -> Result<Artifact, WriteError> {
    let artifact = render(report);

    sink.write_all(&artifact.bytes)
        .and_then(|_| sink.flush())
        .map_err(|cause| WriteError {
            name: artifact.name.clone(),
            cause,
        })?;

    debug!("Wrote {} bytes for {}", artifact.bytes.len(), artifact.name);
    Ok(artifact)
}

/// Write the artifact as a file under `dir`, returning it and its path.
pub fn write_to_dir(report: &Report, dir: &Path) -> Result<(Artifact, PathBuf), WriteError> {
    let path = dir.join(artifact_name(report));
    let io_error = |cause| WriteError {
        name: artifact_name(report),
        cause,
    };

    std::fs::create_dir_all(dir).map_err(io_error)?;
    let file = File::create(&path).map_err(io_error)?;
    let mut sink = BufWriter::new(file);
    let artifact = write(report, &mut sink)?;

    info!(
        "Evidence artifact written to {} ({} data rows)",
        path.display(),
        artifact.data_rows()
    );
    Ok((artifact, path))
}

fn finding_row(finding: &Finding) -> [String; 7] {
    [
        finding.source.to_string(),
        finding.resource_id.clone(),
        finding.severity.to_string(),
        finding
            .control_mapping
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", "),
        finding.description.clone(),
        timestamp(finding.detected_at),
        finding.status.to_string(),
    ]
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn push_row<I: IntoIterator<Item = String>>(output: &mut String, fields: I) {
    let fields: Vec<String> = fields.into_iter().map(|f| escape(&f)).collect();
    output.push_str(&fields.join(","));
    output.push('\n');
}

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionError, Source};
    use std::collections::BTreeMap;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
    }

    fn create_test_report() -> Report {
        let findings = vec![
            Finding::new(
                Source::AccessPolicy,
                "alice",
                Severity::Critical,
                "User alice has console access but no MFA enabled",
                at("2025-04-01T12:00:00Z"),
            )
            .with_controls(["CIS 1.2", "AWS Well-Architected"]),
            Finding::new(
                Source::OrganizationPolicy,
                "region-lock",
                Severity::Medium,
                "SCP \"region-lock\" does not appear to restrict root user activities",
                at("2025-04-01T12:00:00Z"),
            ),
        ];
        let mut errors = BTreeMap::new();
        errors.insert(
            Source::ExternalAccess,
            CollectionError::misconfigured(Source::ExternalAccess, "no analyzer configured"),
        );

        Report::new(
            "123456789012".to_string(),
            findings,
            errors,
            at("2025-04-01T12:30:45Z"),
        )
    }

    #[test]
    fn test_render_csv_layout() {
        let csv = String::from_utf8(render_csv(&create_test_report())).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "source,resource_id,severity,control_mapping,description,detected_at,status"
        );
        assert_eq!(
            lines[1],
            "access-policy,alice,critical,\"AWS Well-Architected, CIS 1.2\",User alice has console access but no MFA enabled,2025-04-01T12:00:00Z,open"
        );
        assert_eq!(
            lines[2],
            "organization-policy,region-lock,medium,,\"SCP \"\"region-lock\"\" does not appear to restrict root user activities\",2025-04-01T12:00:00Z,open"
        );
        assert_eq!(
            lines[3],
            "external-access,collector,info,,misconfigured: no analyzer configured,2025-04-01T12:30:45Z,error"
        );
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_write_is_idempotent() {
        let report = create_test_report();
        let mut first = Vec::new();
        let mut second = Vec::new();

        let a = write(&report, &mut first).unwrap();
        let b = write(&report, &mut second).unwrap();

        assert_eq!(first, second);
        assert_eq!(a, b);
        assert_eq!(a.name, "access-review-2025-04-01-12-30-45.csv");
        assert_eq!(a.data_rows(), 3);
    }

    #[test]
    fn test_sink_failure_is_surfaced() {
        struct BrokenSink;

        impl Write for BrokenSink {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "bucket gone"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let err = write(&create_test_report(), &mut BrokenSink).unwrap_err();
        assert_eq!(err.name, "access-review-2025-04-01-12-30-45.csv");
        assert!(err.to_string().contains("bucket gone"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let report = create_test_report();

        let (artifact, path) = write_to_dir(&report, dir.path()).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), artifact.bytes);
        assert!(path.ends_with("access-review-2025-04-01-12-30-45.csv"));
    }

    #[test]
    fn test_multiline_field_counts_as_one_row() {
        let now = at("2025-04-01T12:00:00Z");
        let report = Report::new(
            "123456789012".to_string(),
            vec![Finding::new(
                Source::SecurityPosture,
                "arn:aws:iam::123456789012:role/ops",
                Severity::High,
                "Role allows wildcard actions.\nAttached by an inline policy.",
                now,
            )],
            BTreeMap::new(),
            now,
        );

        let artifact = render(&report);
        let csv = String::from_utf8(artifact.bytes.clone()).unwrap();

        assert_eq!(csv.lines().count(), 3);
        assert_eq!(artifact.data_rows(), 1);
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
    }
}
