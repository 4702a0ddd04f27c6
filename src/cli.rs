use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gcp::{GcpClient, PubSubClient, StorageClient};
use crate::listener::Listener;
use crate::logreduce::ClassifierInvoker;
use crate::router::JobRouter;

#[derive(Parser)]
#[command(name = "ocpci-logreduce")]
#[command(
    author,
    version,
    about = "Listen for OpenShift CI job results and report anomalous events",
    long_about = None
)]
pub struct Cli {
    /// Google Cloud project owning the subscription
    project_id: String,

    /// Topic receiving the artifact bucket notifications
    topic_id: String,

    /// Subscription to pull messages from
    subscription_id: String,

    /// Configuration file (toml, json or yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop listening after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Maximum number of messages handled at once
    #[arg(short, long)]
    max_messages: Option<usize>,

    /// Directory holding the per job group models
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Bucket holding the CI job artifacts
    #[arg(short, long)]
    bucket: Option<String>,

    /// Write JSON anomaly reports into this directory
    #[arg(short, long)]
    report_dir: Option<PathBuf>,

    /// OAuth2 access token, instead of the metadata server
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl Cli {
    /// Loads the configuration file and lets command line flags override it.
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(timeout) = self.timeout {
            config.listener.timeout_secs = Some(timeout);
        }
        if let Some(max_messages) = self.max_messages {
            config.listener.max_messages = max_messages;
        }
        if let Some(model_dir) = &self.model_dir {
            config.classifier.model_dir = model_dir.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.router.bucket = bucket.clone();
        }
        if let Some(report_dir) = &self.report_dir {
            config.classifier.report_dir = Some(report_dir.clone());
        }
        if let Some(token) = &self.token {
            config.gcp.token = Some(token.clone());
        }

        Ok(config)
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.config()?;

        std::fs::create_dir_all(&config.classifier.model_dir).with_context(|| {
            format!(
                "Failed to create model directory: {}",
                config.classifier.model_dir.display()
            )
        })?;

        let gcp = Arc::new(GcpClient::from_config(&config.gcp)?);
        let pubsub = PubSubClient::new(Arc::clone(&gcp), &config.gcp.pubsub_url);
        let storage = StorageClient::new(gcp, &config.gcp.storage_url, &config.router.bucket)?;

        self.log_subscriptions(&pubsub).await;

        let invoker = ClassifierInvoker::new(
            config.classifier.model_dir.clone(),
            config.classifier.threshold,
        );
        let router = JobRouter::new(storage, invoker, config.classifier.report_dir.clone());
        let listener = Listener::new(
            pubsub,
            router,
            PubSubClient::subscription_path(&self.project_id, &self.subscription_id),
            config.listener.max_messages,
            Duration::from_millis(config.listener.idle_delay_ms),
        );

        listener.run(config.listener.timeout()).await?;

        Ok(())
    }

    /// Startup diagnostics, failures here do not prevent listening.
    async fn log_subscriptions(&self, pubsub: &PubSubClient) {
        match pubsub.list_subscriptions(&self.project_id).await {
            Ok(subscriptions) => {
                info!("Subscriptions in project {}:", self.project_id);
                for subscription in subscriptions {
                    info!("  {} (topic: {})", subscription.name, subscription.topic);
                }
            }
            Err(e) => warn!("Failed to list subscriptions: {e}"),
        }

        let topic = PubSubClient::topic_path(&self.project_id, &self.topic_id);
        match pubsub.list_topic_subscriptions(&topic).await {
            Ok(subscriptions) => {
                info!("Subscriptions on topic {topic}:");
                for subscription in subscriptions {
                    info!("  {subscription}");
                }
            }
            Err(e) => warn!("Failed to list topic subscriptions: {e}"),
        }
    }
}
