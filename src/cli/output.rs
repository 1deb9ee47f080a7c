//! Output formatting for CLI results.
//!
//! All formatters return strings; only the binary entry point prints.

use crate::config::CredentialStatus;
use crate::error::Error;
use crate::ingest::IngestReport;
use crate::recall::ScoredEntry;
use crate::storage::StoreStats;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Structured JSON.
    Json,
}

impl OutputFormat {
    /// Maps the `--json` flag.
    #[must_use]
    pub const fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// Formats an error for the selected output.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::json!({ "error": error.to_string() }).to_string()
        }
        OutputFormat::Text => error.to_string(),
    }
}

/// Formats the ingest report: per-file lines, failed-file list, and the
/// aggregate summary.
#[must_use]
pub fn format_ingest_report(report: &IngestReport, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }

    let mut out = String::new();
    for file in &report.files {
        if let Some(count) = file.would_delete {
            out.push_str(&format!("{}: would delete {count} rows\n", file.path));
            continue;
        }
        if file.skipped {
            out.push_str(&format!("{}: skipped (already ingested)\n", file.path));
            continue;
        }
        if file.failed.is_none() {
            out.push_str(&format!(
                "{}: extracted {} stored {} reinforced {} skipped {} superseded {}\n",
                file.path,
                file.entries_extracted,
                file.outcome.added + file.outcome.updated,
                file.outcome.reinforced,
                file.outcome.skipped,
                file.outcome.superseded,
            ));
        }
    }

    let failed = report.failed_files();
    if !failed.is_empty() {
        out.push_str("\nFailed files:\n");
        for file in &failed {
            out.push_str(&format!(
                "  {}: {}\n",
                file.path,
                file.failed.as_deref().unwrap_or("unknown")
            ));
        }
    }

    let totals = report.totals();
    out.push_str(&format!(
        "\n{} files ({} skipped, {} failed), {} extracted, {} stored, {} reinforced",
        report.files.len(),
        report.skipped_count(),
        failed.len(),
        report.total_extracted(),
        totals.added + totals.updated,
        totals.reinforced,
    ));
    if report.rounds > 0 {
        out.push_str(&format!(", {} retry rounds", report.rounds));
    }
    if report.aborted {
        out.push_str(", aborted");
    }
    out.push('\n');
    out
}

/// Formats recall results.
#[must_use]
pub fn format_recall_results(results: &[ScoredEntry], format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(results)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }

    if results.is_empty() {
        return "no matching memories\n".to_string();
    }

    let mut out = String::new();
    for (rank, result) in results.iter().enumerate() {
        let entry = &result.entry;
        out.push_str(&format!(
            "{:>2}. [{:.3}] ({}, i{}) {}: {}\n",
            rank + 1,
            result.score,
            entry.kind.as_str(),
            entry.importance,
            entry.subject,
            entry.content,
        ));
    }
    out
}

/// Formats the health report.
#[must_use]
pub fn format_health(stats: &StoreStats, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(stats)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }

    let mut out = String::new();
    out.push_str(&format!(
        "entries: {} total, {} active, {} retired, {} superseded\n",
        stats.total_entries, stats.active_entries, stats.retired_entries, stats.superseded_entries,
    ));
    for (kind, count) in &stats.entries_by_kind {
        out.push_str(&format!("  {kind}: {count}\n"));
    }
    out.push_str(&format!(
        "ingested files: {}\nco-recall edges: {}\nschema version: {}\n",
        stats.ingested_files, stats.co_recall_edges, stats.schema_version,
    ));
    if let Some(size) = stats.db_size {
        out.push_str(&format!("db size: {size} bytes\n"));
    }
    out
}

/// Formats the credential report.
#[must_use]
pub fn format_credentials(report: &[CredentialStatus], format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return serde_json::to_string_pretty(report)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
    }
    let mut out = String::new();
    for status in report {
        out.push_str(&format!(
            "{}: {}\n",
            status.env_var,
            if status.found { "found" } else { "not found" }
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::BatchOutcome;
    use crate::ingest::FileReport;

    fn sample_report() -> IngestReport {
        IngestReport {
            files: vec![
                FileReport {
                    path: "/tmp/a.jsonl".to_string(),
                    skipped: false,
                    failed: None,
                    entries_extracted: 4,
                    outcome: BatchOutcome {
                        added: 3,
                        reinforced: 1,
                        ..BatchOutcome::default()
                    },
                    would_delete: None,
                },
                FileReport {
                    path: "/tmp/b.md".to_string(),
                    skipped: false,
                    failed: Some("write failed: boom".to_string()),
                    entries_extracted: 0,
                    outcome: BatchOutcome::default(),
                    would_delete: None,
                },
            ],
            rounds: 1,
            aborted: false,
        }
    }

    #[test]
    fn test_ingest_text_summary() {
        let text = format_ingest_report(&sample_report(), OutputFormat::Text);
        assert!(text.contains("/tmp/a.jsonl: extracted 4 stored 3 reinforced 1"));
        assert!(text.contains("Failed files:"));
        assert!(text.contains("/tmp/b.md: write failed: boom"));
        assert!(text.contains("1 retry rounds"));
    }

    #[test]
    fn test_ingest_json_round_trips() {
        let json = format_ingest_report(&sample_report(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["files"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_error_formats() {
        let err = Error::Cancelled;
        assert_eq!(format_error(&err, OutputFormat::Text), "operation cancelled");
        let json: serde_json::Value =
            serde_json::from_str(&format_error(&err, OutputFormat::Json)).unwrap();
        assert_eq!(json["error"], "operation cancelled");
    }

    #[test]
    fn test_empty_recall_text() {
        assert_eq!(
            format_recall_results(&[], OutputFormat::Text),
            "no matching memories\n"
        );
    }
}
