use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::error::Result;
use crate::gcp::{PubSubClient, PubsubMessage, ReceivedMessage};
use crate::job::{JobId, FINISHED_JSON};
use crate::router::{JobOutcome, JobRouter};

/// Cloud Storage object notification carried by each message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectNotification {
    /// Object name relative to the bucket
    pub name: Option<String>,
    /// `{bucket}/{name}/{generation}`
    pub id: Option<String>,
    pub bucket: Option<String>,
}

impl ObjectNotification {
    pub fn decode(message: &PubsubMessage) -> Result<Self> {
        Ok(serde_json::from_slice(&message.payload()?)?)
    }

    /// The bucket-qualified id, rebuilt from bucket and name when absent.
    fn qualified_id(&self, name: &str) -> String {
        self.id.clone().unwrap_or_else(|| {
            format!("{}/{}", self.bucket.as_deref().unwrap_or_default(), name)
        })
    }
}

/// Why a message was dropped without routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingName,
    NotFinished,
    PeriodicLogs,
    BatchJob,
    UnrecognizedPath,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MissingName => "no object name",
            Self::NotFinished => "not a finished.json",
            Self::PeriodicLogs => "under /logs/",
            Self::BatchJob => "batch pull request job",
            Self::UnrecognizedPath => "not a pull request job path",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Accept(JobId),
    Reject(RejectReason),
}

/// Decides whether a notification names the terminal status file of a
/// non-batch pull request job.
pub fn admit(notification: &ObjectNotification) -> Admission {
    let Some(name) = notification.name.as_deref() else {
        return Admission::Reject(RejectReason::MissingName);
    };

    if !name.contains(FINISHED_JSON) {
        return Admission::Reject(RejectReason::NotFinished);
    }

    let id = notification.qualified_id(name);
    if id.contains("/logs/") {
        return Admission::Reject(RejectReason::PeriodicLogs);
    }
    if id.contains("/pr-logs/pull/batch/") {
        return Admission::Reject(RejectReason::BatchJob);
    }

    match JobId::from_path(name) {
        Ok(job) => Admission::Accept(job),
        Err(_) => Admission::Reject(RejectReason::UnrecognizedPath),
    }
}

/// Pulls job notifications from a subscription and routes accepted ones.
///
/// At most `max_messages` messages are in flight: a batch is processed
/// concurrently and acknowledged before the next pull.
pub struct Listener {
    pubsub: PubSubClient,
    router: JobRouter,
    subscription: String,
    max_messages: usize,
    idle_delay: Duration,
}

impl Listener {
    pub fn new(
        pubsub: PubSubClient,
        router: JobRouter,
        subscription: String,
        max_messages: usize,
        idle_delay: Duration,
    ) -> Self {
        Self {
            pubsub,
            router,
            subscription,
            max_messages: max_messages.max(1),
            idle_delay,
        }
    }

    /// Listens until `timeout` elapses, Ctrl-C is received, or pulling fails.
    pub async fn run(&self, timeout: Option<Duration>) -> Result<()> {
        info!("Listening for messages on {}..", self.subscription);

        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = self.listen() => result,
            () = deadline => {
                info!("Listening timed out, cancelling subscription");
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling subscription");
                Ok(())
            }
        }
    }

    async fn listen(&self) -> Result<()> {
        loop {
            if self.poll().await? == 0 {
                tokio::time::sleep(self.idle_delay).await;
            }
        }
    }

    /// Pulls one batch, handles every message and acknowledges all of them,
    /// whatever the outcome. Returns the number of messages pulled.
    pub async fn poll(&self) -> Result<usize> {
        let batch = self
            .pubsub
            .pull(&self.subscription, self.max_messages)
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }

        debug!("Pulled {} messages", batch.len());
        futures::future::join_all(batch.iter().map(|received| self.handle(received))).await;

        let ack_ids: Vec<String> = batch.iter().map(|r| r.ack_id.clone()).collect();
        self.pubsub.acknowledge(&self.subscription, &ack_ids).await?;

        Ok(batch.len())
    }

    /// Handles a single message. Failures are logged, never propagated, so
    /// that one bad job does not stop the listener.
    pub async fn handle(&self, received: &ReceivedMessage) -> Option<JobOutcome> {
        let message_id = &received.message.message_id;

        let notification = match ObjectNotification::decode(&received.message) {
            Ok(notification) => notification,
            Err(e) => {
                error!("Dropping malformed message {message_id}: {e}");
                return None;
            }
        };

        match admit(&notification) {
            Admission::Reject(RejectReason::MissingName) => {
                warn!("No object name in message {message_id}");
                None
            }
            Admission::Reject(reason) => {
                debug!(
                    "Message reject ({reason}): {}",
                    notification.name.as_deref().unwrap_or_default()
                );
                None
            }
            Admission::Accept(job) => {
                info!("Message accept: {job}");
                match self.router.route(&job).await {
                    Ok(outcome) => {
                        info!("Processed {job}: {outcome}");
                        Some(outcome)
                    }
                    Err(e) => {
                        error!("Failed to process {job}: {e}");
                        None
                    }
                }
            }
        }
    }
}
