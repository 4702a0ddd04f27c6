use std::fmt::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color as TableColor};
use log::info;
use serde::Serialize;

use super::styling::{bright, bright_green, dim};
use super::tables::{color_coded_distance_cell, create_table};
use crate::error::Result;
use crate::job::JobId;
use crate::logreduce::Anomaly;

/// Anomalies found in one failed build.
#[derive(Debug, Serialize)]
pub struct AnomalyReport {
    pub gjid: String,
    pub org_repo: String,
    pub pull_number: String,
    pub job_name: String,
    pub build_number: String,
    pub artifact: String,
    pub collected_at: DateTime<Utc>,
    pub tested: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn new(job: &JobId, artifact: &str, tested: usize, anomalies: Vec<Anomaly>) -> Self {
        Self {
            gjid: job.gjid(),
            org_repo: job.org_repo.clone(),
            pull_number: job.pull_number.clone(),
            job_name: job.job_name.clone(),
            build_number: job.build_number.clone(),
            artifact: artifact.to_string(),
            collected_at: Utc::now(),
            tested,
            anomalies,
        }
    }

    /// `{gjid}-{build_number}.json`
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.gjid, self.build_number)
    }

    /// Writes the report as pretty JSON into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Anomaly report written to: {}", path.display());
        Ok(path)
    }
}

/// Prints an anomaly report to stdout.
pub fn print_report(report: &AnomalyReport) {
    println!("{}", render_report(report));
}

fn render_report(report: &AnomalyReport) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{} {}",
        bright("🔎"),
        bright(format!(
            "{} #{} build {}",
            report.job_name, report.pull_number, report.build_number
        ))
        .underlined()
    );
    let _ = writeln!(output, "  {} {}", dim("repository:"), report.org_repo);
    let _ = writeln!(output, "  {} {}", dim("artifact:"), report.artifact);

    if report.anomalies.is_empty() {
        let _ = writeln!(
            output,
            "  {}",
            bright_green(format!("No anomalies in {} events ✓", report.tested))
        );
        return output;
    }

    let mut table = create_table();
    table.set_header(
        ["Distance", "Time", "Reason", "Object", "Message"]
            .iter()
            .map(|label| Cell::new(*label).fg(TableColor::Cyan))
            .collect::<Vec<_>>(),
    );

    for anomaly in &report.anomalies {
        let event = &anomaly.event;
        let time = event
            .last_timestamp
            .map(|ts| ts.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        let object = event
            .involved_object
            .as_ref()
            .map(|o| format!("{}/{}", o.kind, o.name))
            .unwrap_or_default();

        table.add_row(vec![
            color_coded_distance_cell(anomaly.distance),
            Cell::new(time),
            Cell::new(event.reason.clone().unwrap_or_default()),
            Cell::new(object),
            Cell::new(&event.message),
        ]);
    }

    let _ = writeln!(
        output,
        "  {} of {} events look anomalous",
        report.anomalies.len(),
        report.tested
    );
    let _ = writeln!(output, "{table}");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logreduce::EventRecord;
    use tempfile::TempDir;

    fn job() -> JobId {
        JobId::from_path("pr-logs/pull/openshift_origin/100/e2e-aws/7/finished.json").unwrap()
    }

    fn anomaly(message: &str) -> Anomaly {
        Anomaly {
            distance: 0.83,
            artifact: job().events_json_path(),
            event: EventRecord {
                message: message.to_string(),
                reason: Some("Unhealthy".to_string()),
                ..EventRecord::default()
            },
        }
    }

    #[test]
    fn test_render_lists_anomalies() {
        let report = AnomalyReport::new(
            &job(),
            &job().events_json_path(),
            12,
            vec![anomaly("Readiness probe failed")],
        );

        let rendered = render_report(&report);
        assert!(rendered.contains("Readiness probe failed"));
        assert!(rendered.contains("Unhealthy"));
        assert!(rendered.contains("0.83"));
        assert!(rendered.contains("1 of 12 events"));
    }

    #[test]
    fn test_render_without_anomalies() {
        let report = AnomalyReport::new(&job(), &job().events_json_path(), 5, vec![]);
        assert!(render_report(&report).contains("No anomalies in 5 events"));
    }

    #[test]
    fn test_write_report() {
        let temp_dir = TempDir::new().unwrap();
        let report = AnomalyReport::new(
            &job(),
            &job().events_json_path(),
            3,
            vec![anomaly("Back-off restarting failed container")],
        );

        let path = report.write_to(&temp_dir.path().join("reports")).unwrap();

        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("openshift_origin-e2e-aws-7.json")
        );
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["gjid"], "openshift_origin-e2e-aws");
        assert_eq!(
            written["anomalies"][0]["event"]["message"],
            "Back-off restarting failed container"
        );
    }
}
