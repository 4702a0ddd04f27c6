use serde::Deserialize;
use std::fmt;

use crate::error::{OcpciError, Result};

/// Root of pull request job artifacts inside the CI bucket.
pub const PR_LOGS_PULL_DIR: &str = "pr-logs/pull";

pub const FINISHED_JSON: &str = "finished.json";

/// Location of the cluster event log relative to a build directory.
pub const EVENTS_JSON: &str = "artifacts/build-resources/events.json";

// Positions inside `pr-logs/pull/{org_repo}/{pull}/{job}/{build}/...`
const ORG_REPO_SEGMENT: usize = 2;
const PULL_NUMBER_SEGMENT: usize = 3;
const JOB_NAME_SEGMENT: usize = 4;
const BUILD_NUMBER_SEGMENT: usize = 5;

/// Identity of one pull request job build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobId {
    /// Organization and repository joined by an underscore (e.g. `openshift_installer`)
    pub org_repo: String,
    pub pull_number: String,
    pub job_name: String,
    pub build_number: String,
}

impl JobId {
    /// Parses a bucket-relative artifact path by segment position.
    ///
    /// Only the layout is checked: the path must sit under `pr-logs/pull/` and
    /// reach at least the build number segment.
    pub fn from_path(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();

        if parts.len() <= BUILD_NUMBER_SEGMENT
            || format!("{}/{}", parts[0], parts[1]) != PR_LOGS_PULL_DIR
            || parts[ORG_REPO_SEGMENT..=BUILD_NUMBER_SEGMENT]
                .iter()
                .any(|p| p.is_empty())
        {
            return Err(OcpciError::MalformedPath(path.to_string()));
        }

        Ok(Self {
            org_repo: parts[ORG_REPO_SEGMENT].to_string(),
            pull_number: parts[PULL_NUMBER_SEGMENT].to_string(),
            job_name: parts[JOB_NAME_SEGMENT].to_string(),
            build_number: parts[BUILD_NUMBER_SEGMENT].to_string(),
        })
    }

    /// `pr-logs/pull/{org_repo}/{pull_number}/{job_name}/{build_number}`
    pub fn build_dir(&self) -> String {
        format!(
            "{PR_LOGS_PULL_DIR}/{}/{}/{}/{}",
            self.org_repo, self.pull_number, self.job_name, self.build_number
        )
    }

    pub fn finished_json_path(&self) -> String {
        format!("{}/{FINISHED_JSON}", self.build_dir())
    }

    pub fn events_json_path(&self) -> String {
        format!("{}/{EVENTS_JSON}", self.build_dir())
    }

    pub fn gjid(&self) -> String {
        format!("{}-{}", self.org_repo, self.job_name)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {} build {}",
            self.org_repo, self.pull_number, self.job_name, self.build_number
        )
    }
}

/// Derives the job-group identity `{org_repo}-{job_name}` from an artifact
/// path. All builds of the same job on the same repository share one model.
pub fn gjid_from_path(path: &str) -> Result<String> {
    JobId::from_path(path).map(|job| job.gjid())
}

/// Outcome recorded in `finished.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
    Unknown,
}

#[derive(Deserialize)]
struct FinishedJson {
    result: Option<String>,
}

impl JobStatus {
    /// Reads the `result` field of a `finished.json` payload.
    ///
    /// Falls back to a raw substring search when the payload is not valid
    /// JSON, as truncated uploads still carry the compact result marker.
    pub fn from_finished_json(payload: &str) -> Self {
        if let Ok(FinishedJson {
            result: Some(result),
        }) = serde_json::from_str::<FinishedJson>(payload)
        {
            return match result.as_str() {
                "SUCCESS" => Self::Success,
                "FAILURE" => Self::Failure,
                _ => Self::Unknown,
            };
        }

        if payload.contains(r#""result":"SUCCESS""#) {
            Self::Success
        } else if payload.contains(r#""result":"FAILURE""#) {
            Self::Failure
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINISHED: &str =
        "pr-logs/pull/openshift_installer/4512/pull-ci-openshift-installer-master-e2e-aws/1366/finished.json";

    #[test]
    fn test_parse_finished_json_path() {
        let job = JobId::from_path(FINISHED).unwrap();

        assert_eq!(job.org_repo, "openshift_installer");
        assert_eq!(job.pull_number, "4512");
        assert_eq!(job.job_name, "pull-ci-openshift-installer-master-e2e-aws");
        assert_eq!(job.build_number, "1366");
    }

    #[test]
    fn test_artifact_paths() {
        let job = JobId::from_path(FINISHED).unwrap();

        assert_eq!(job.finished_json_path(), FINISHED);
        assert_eq!(
            job.events_json_path(),
            "pr-logs/pull/openshift_installer/4512/pull-ci-openshift-installer-master-e2e-aws/1366/artifacts/build-resources/events.json"
        );
    }

    #[test]
    fn test_gjid_is_shared_across_builds() {
        let first = gjid_from_path(
            "pr-logs/pull/openshift_origin/1/e2e-gcp/10/artifacts/build-resources/events.json",
        )
        .unwrap();
        let second = gjid_from_path(
            "pr-logs/pull/openshift_origin/2/e2e-gcp/99/artifacts/build-resources/events.json",
        )
        .unwrap();

        assert_eq!(first, "openshift_origin-e2e-gcp");
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_unexpected_layouts() {
        assert!(JobId::from_path("logs/periodic-ci/123/finished.json").is_err());
        assert!(JobId::from_path("pr-logs/pull/org_repo/1/finished.json").is_err());
        assert!(JobId::from_path("pr-logs/pull/org_repo//job/2/finished.json").is_err());
        assert!(JobId::from_path("").is_err());
    }

    #[test]
    fn test_status_from_compact_payload() {
        assert_eq!(
            JobStatus::from_finished_json(r#"{"timestamp":1,"passed":true,"result":"SUCCESS"}"#),
            JobStatus::Success
        );
        assert_eq!(
            JobStatus::from_finished_json(r#"{"timestamp":1,"passed":false,"result":"FAILURE"}"#),
            JobStatus::Failure
        );
    }

    #[test]
    fn test_status_from_pretty_payload() {
        let payload = "{\n  \"passed\": false,\n  \"result\": \"FAILURE\"\n}";
        assert_eq!(JobStatus::from_finished_json(payload), JobStatus::Failure);
    }

    #[test]
    fn test_status_falls_back_to_substring() {
        let truncated = r#"{"timestamp":1,"result":"FAILURE","metadata":{"#;
        assert_eq!(JobStatus::from_finished_json(truncated), JobStatus::Failure);
        assert_eq!(JobStatus::from_finished_json(r#"{"result":"ABORTED"}"#), JobStatus::Unknown);
        assert_eq!(JobStatus::from_finished_json("not json"), JobStatus::Unknown);
    }
}
