use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use serde::Serialize;

use super::events::EventRecord;
use super::model::{Classifier, HashingNeighbors};
use crate::error::{OcpciError, Result};
use crate::job::gjid_from_path;

/// Name of the model trained on `events.json` artifacts.
pub const EVENTS_MODEL: &str = "events";

/// An event line that is far from everything seen in the baseline.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub distance: f32,
    pub artifact: String,
    pub event: EventRecord,
}

/// What invoking the classifier did for one artifact.
#[derive(Debug)]
pub enum Classification {
    /// First failure seen for this job group, used as its baseline.
    Trained {
        gjid: String,
        model_path: PathBuf,
        samples: usize,
    },
    /// Artifact scored against the existing baseline.
    Scored {
        gjid: String,
        tested: usize,
        anomalies: Vec<Anomaly>,
    },
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trained {
                gjid,
                model_path,
                samples,
            } => write!(
                f,
                "trained {gjid} from {samples} events ({})",
                model_path.display()
            ),
            Self::Scored {
                gjid,
                tested,
                anomalies,
            } => write!(
                f,
                "scored {tested} events against {gjid}, {} anomalies",
                anomalies.len()
            ),
        }
    }
}

/// Trains or scores per job group models stored as `{model_dir}/{gjid}.pkt`.
pub struct ClassifierInvoker {
    model_dir: PathBuf,
    threshold: f32,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClassifierInvoker {
    pub fn new(model_dir: impl Into<PathBuf>, threshold: f32) -> Self {
        Self {
            model_dir: model_dir.into(),
            threshold,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_path(&self, gjid: &str) -> PathBuf {
        self.model_dir.join(format!("{gjid}.pkt"))
    }

    fn lock_for(&self, gjid: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(gjid.to_string()).or_default())
    }

    /// Classifies the events of the artifact at `artifact_path`.
    ///
    /// The first call for a job group trains and persists its model; later
    /// calls load it and report lines whose distance exceeds the threshold.
    /// Existing models are never retrained.
    pub async fn invoke(
        &self,
        artifact_path: &str,
        events: &[EventRecord],
    ) -> Result<Classification> {
        let gjid = gjid_from_path(artifact_path)?;
        info!("Classifying {artifact_path} (gjid {gjid})");

        // Builds of the same job group must not train and score concurrently.
        let lock = self.lock_for(&gjid);
        let _guard = lock.lock().await;

        let model_path = self.model_path(&gjid);
        if model_path.exists() {
            let classifier = Classifier::load(&model_path)?;
            let anomalies = get_anomalies(&classifier, artifact_path, events, self.threshold)?;
            info!(
                "Scored {} events for {gjid}: {} anomalies",
                events.len(),
                anomalies.len()
            );

            Ok(Classification::Scored {
                gjid,
                tested: events.len(),
                anomalies,
            })
        } else {
            let classifier = create_model(&gjid, events, &model_path)?;
            let samples = classifier
                .model(EVENTS_MODEL)
                .map_or(0, HashingNeighbors::len);
            info!(
                "Created model for {gjid} from {samples} distinct events: {}",
                model_path.display()
            );

            Ok(Classification::Trained {
                gjid,
                model_path,
                samples,
            })
        }
    }
}

/// Scores `events` against the `events` model of `classifier`.
pub fn get_anomalies(
    classifier: &Classifier,
    artifact: &str,
    events: &[EventRecord],
    threshold: f32,
) -> Result<Vec<Anomaly>> {
    let model = classifier.model(EVENTS_MODEL).ok_or_else(|| {
        OcpciError::Model(format!("No {EVENTS_MODEL} model for {}", classifier.gjid))
    })?;

    let data: Vec<String> = events
        .iter()
        .map(|event| HashingNeighbors::process_line(&event.message))
        .collect();
    let distances = model.test(&data);

    Ok(distances
        .into_iter()
        .zip(events)
        .filter(|(distance, _)| *distance > threshold)
        .map(|(distance, event)| Anomaly {
            distance,
            artifact: artifact.to_string(),
            event: event.clone(),
        })
        .collect())
}

/// Trains a new classifier on `events` and saves it to `model_path`.
///
/// Refuses to persist a baseline without a single usable line, so that the
/// next failure of the job group gets a chance to become the baseline.
pub fn create_model(gjid: &str, events: &[EventRecord], model_path: &Path) -> Result<Classifier> {
    let mut classifier = Classifier::new(gjid);
    let model = classifier.get(EVENTS_MODEL);
    model.train(
        events
            .iter()
            .map(|event| HashingNeighbors::process_line(&event.message)),
    );

    if model.is_empty() {
        return Err(OcpciError::Model(format!(
            "No usable events to train a model for {gjid}"
        )));
    }

    classifier.save(model_path)?;
    Ok(classifier)
}
