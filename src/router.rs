use std::fmt;
use std::path::PathBuf;

use log::{debug, info, warn};

use crate::error::Result;
use crate::gcp::StorageClient;
use crate::job::{JobId, JobStatus};
use crate::logreduce::{import_events, Classification, ClassifierInvoker};
use crate::output::{print_report, AnomalyReport};

/// What happened to an accepted job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The build has no `events.json`, nothing to classify.
    MissingEvents,
    /// The build passed.
    Passed,
    /// `finished.json` carries neither a success nor a failure result.
    Unrecognized,
    /// The build failed and its events went through the classifier.
    Classified(Classification),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEvents => f.write_str("no events.json"),
            Self::Passed => f.write_str("passed"),
            Self::Unrecognized => f.write_str("unrecognized result"),
            Self::Classified(classification) => write!(f, "{classification}"),
        }
    }
}

/// Fetches the artifacts of an accepted job and hands failed builds to the
/// classifier.
pub struct JobRouter {
    storage: StorageClient,
    invoker: ClassifierInvoker,
    report_dir: Option<PathBuf>,
}

impl JobRouter {
    pub fn new(
        storage: StorageClient,
        invoker: ClassifierInvoker,
        report_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            storage,
            invoker,
            report_dir,
        }
    }

    pub async fn route(&self, job: &JobId) -> Result<JobOutcome> {
        let finished_json_path = job.finished_json_path();
        let events_json_path = job.events_json_path();

        debug!(
            "Fetching gs://{}/{finished_json_path}",
            self.storage.bucket()
        );
        let finished_json = self.storage.download_string(&finished_json_path).await?;

        if !self.storage.exists(&events_json_path).await? {
            info!("No events.json for {job}");
            return Ok(JobOutcome::MissingEvents);
        }

        match JobStatus::from_finished_json(&finished_json) {
            JobStatus::Success => {
                debug!("{job} passed");
                Ok(JobOutcome::Passed)
            }
            JobStatus::Unknown => {
                warn!("{job} has no recognizable result in finished.json");
                Ok(JobOutcome::Unrecognized)
            }
            JobStatus::Failure => {
                info!("{job} failed, classifying its events");
                let payload = self.storage.download(&events_json_path).await?;
                let events = import_events(&payload)?;

                let classification = self.invoker.invoke(&events_json_path, &events).await?;
                self.report(job, &events_json_path, &classification)?;

                Ok(JobOutcome::Classified(classification))
            }
        }
    }

    fn report(
        &self,
        job: &JobId,
        artifact: &str,
        classification: &Classification,
    ) -> Result<()> {
        let Classification::Scored {
            tested, anomalies, ..
        } = classification
        else {
            return Ok(());
        };

        let report = AnomalyReport::new(job, artifact, *tested, anomalies.clone());
        print_report(&report);

        if let Some(dir) = &self.report_dir {
            report.write_to(dir)?;
        }

        Ok(())
    }
}
