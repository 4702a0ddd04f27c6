use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Message prefixes carrying unfiltered noise, such as
/// `Successfully assigned ci-op-6ts4i744/e2e-openstack to origin-ci-ig-n-tjcs`.
pub const NOISE_PREFIXES: &[&str] = &["Successfully assigned "];

/// One Kubernetes event from a job's `events.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_object: Option<InvolvedObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvolvedObject {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

/// `events.json` is normally an `EventList`, but a bare array is accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum EventLog {
    List { items: Vec<EventRecord> },
    Bare(Vec<EventRecord>),
}

pub fn is_noise(message: &str) -> bool {
    NOISE_PREFIXES
        .iter()
        .any(|prefix| message.starts_with(prefix))
}

/// Parses an `events.json` payload and drops noise events.
pub fn import_events(payload: &[u8]) -> Result<Vec<EventRecord>> {
    let items = match serde_json::from_slice::<EventLog>(payload)? {
        EventLog::List { items } => items,
        EventLog::Bare(items) => items,
    };

    Ok(items
        .into_iter()
        .filter(|event| !is_noise(&event.message))
        .collect())
}
