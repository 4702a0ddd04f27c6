use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use super::tokenizer;
use crate::error::{OcpciError, Result};

/// Size of the hashed feature space.
pub const N_FEATURES: u32 = 1 << 18;

/// Nearest-neighbour model over feature-hashed log lines.
///
/// Every tokenized line becomes a binary sparse vector: the set of hashed
/// word indices it contains. Training keeps the distinct vectors of the
/// baseline; testing returns, for each line, the cosine distance to the
/// closest baseline vector (0 for a known line, 1 for a line sharing no word
/// with the baseline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingNeighbors {
    n_features: u32,
    samples: Vec<Vec<u32>>,
}

impl Default for HashingNeighbors {
    fn default() -> Self {
        Self {
            n_features: N_FEATURES,
            samples: Vec::new(),
        }
    }
}

impl HashingNeighbors {
    pub fn process_line(line: &str) -> String {
        tokenizer::process(line)
    }

    /// Number of distinct baseline vectors.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn feature_index(&self, word: &str) -> u32 {
        let hash = blake3::hash(word.as_bytes());
        let bytes = hash.as_bytes();
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % self.n_features
    }

    /// Sorted, deduplicated feature indices of a tokenized line.
    fn vectorize(&self, tokens: &str) -> Vec<u32> {
        let indices: BTreeSet<u32> = tokens
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|word| word.len() >= 2)
            .map(|word| self.feature_index(&word.to_lowercase()))
            .collect();

        indices.into_iter().collect()
    }

    /// Replaces the baseline with the given tokenized lines.
    pub fn train<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let samples: BTreeSet<Vec<u32>> = lines
            .into_iter()
            .map(|line| self.vectorize(line.as_ref()))
            .filter(|vector| !vector.is_empty())
            .collect();

        self.samples = samples.into_iter().collect();
        debug!("Trained on {} distinct lines", self.samples.len());
    }

    /// Distance of each tokenized line to its nearest baseline vector.
    ///
    /// Lines with no usable token score 0.
    pub fn test<S: AsRef<str>>(&self, lines: &[S]) -> Vec<f32> {
        lines
            .iter()
            .map(|line| {
                let vector = self.vectorize(line.as_ref());
                if vector.is_empty() {
                    return 0.0;
                }

                self.samples
                    .iter()
                    .map(|sample| cosine_distance(&vector, sample))
                    .fold(1.0_f32, f32::min)
            })
            .collect()
    }
}

/// Cosine distance between two binary vectors given as sorted index lists.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn cosine_distance(a: &[u32], b: &[u32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }

    let (mut i, mut j, mut shared) = (0, 0, 0_usize);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }

    let similarity = shared as f64 / ((a.len() * b.len()) as f64).sqrt();
    (1.0 - similarity).max(0.0) as f32
}

/// A set of named models trained for one job group.
///
/// Models are keyed by artifact kind (only `events` today) so that other log
/// files of the same job can be added to the same persisted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    pub gjid: String,
    pub trained_at: DateTime<Utc>,
    models: BTreeMap<String, HashingNeighbors>,
}

impl Classifier {
    pub fn new(gjid: &str) -> Self {
        Self {
            gjid: gjid.to_string(),
            trained_at: Utc::now(),
            models: BTreeMap::new(),
        }
    }

    /// Returns the model for `name`, creating an untrained one if needed.
    pub fn get(&mut self, name: &str) -> &mut HashingNeighbors {
        self.models.entry(name.to_string()).or_default()
    }

    pub fn model(&self, name: &str) -> Option<&HashingNeighbors> {
        self.models.get(name)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read(path)?;
        serde_json::from_slice(&content).map_err(|e| {
            OcpciError::Model(format!("Failed to load model {}: {e}", path.display()))
        })
    }

    /// Writes the classifier next to its final location, then renames it so
    /// a reader never sees a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("pkt.tmp");
        fs::write(&tmp_path, serde_json::to_vec(self)?)?;
        fs::rename(&tmp_path, path)?;

        debug!("Saved model for {} to {}", self.gjid, path.display());
        Ok(())
    }
}
