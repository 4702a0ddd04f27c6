use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::client::GcpClient;
use crate::error::Result;

/// A message as delivered by a pull request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Base64 encoded payload
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub message_id: String,
}

impl PubsubMessage {
    /// Decodes the message payload.
    pub fn payload(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.data.as_bytes())?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub name: String,
    #[serde(default)]
    pub topic: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<Subscription>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTopicSubscriptionsResponse {
    #[serde(default)]
    subscriptions: Vec<String>,
    next_page_token: Option<String>,
}

/// Pub/Sub REST client covering the calls the listener needs.
pub struct PubSubClient {
    gcp: Arc<GcpClient>,
    base_url: String,
}

impl PubSubClient {
    pub fn new(gcp: Arc<GcpClient>, base_url: &str) -> Self {
        Self {
            gcp,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fully qualified `projects/{project}/subscriptions/{subscription}`.
    pub fn subscription_path(project_id: &str, subscription_id: &str) -> String {
        format!("projects/{project_id}/subscriptions/{subscription_id}")
    }

    /// Fully qualified `projects/{project}/topics/{topic}`.
    pub fn topic_path(project_id: &str, topic_id: &str) -> String {
        format!("projects/{project_id}/topics/{topic_id}")
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.base_url, resource)
    }

    /// Pulls up to `max_messages` messages. Returns an empty batch when the
    /// subscription has nothing pending.
    pub async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>> {
        let url = self.url(&format!("{subscription}:pull"));
        let body = PullRequest { max_messages };

        let response: PullResponse = self
            .gcp
            .execute_json(|c| c.post(&url).json(&body))
            .await?;

        Ok(response.received_messages)
    }

    pub async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
        if ack_ids.is_empty() {
            return Ok(());
        }

        let url = self.url(&format!("{subscription}:acknowledge"));
        let body = AcknowledgeRequest { ack_ids };

        self.gcp.execute(|c| c.post(&url).json(&body)).await?;
        Ok(())
    }

    /// Lists all subscriptions in a project, following pagination.
    pub async fn list_subscriptions(&self, project_id: &str) -> Result<Vec<Subscription>> {
        let url = self.url(&format!("projects/{project_id}/subscriptions"));
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response: ListSubscriptionsResponse = self
                .gcp
                .execute_json(|c| {
                    let request = c.get(&url);
                    match &page_token {
                        Some(token) => request.query(&[("pageToken", token)]),
                        None => request,
                    }
                })
                .await?;

            all.extend(response.subscriptions);

            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all)
    }

    /// Lists the names of subscriptions attached to a topic.
    pub async fn list_topic_subscriptions(&self, topic: &str) -> Result<Vec<String>> {
        let url = self.url(&format!("{topic}/subscriptions"));
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let response: ListTopicSubscriptionsResponse = self
                .gcp
                .execute_json(|c| {
                    let request = c.get(&url);
                    match &page_token {
                        Some(token) => request.query(&[("pageToken", token)]),
                        None => request,
                    }
                })
                .await?;

            all.extend(response.subscriptions);

            match response.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenSource;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(server: &mockito::Server) -> PubSubClient {
        let gcp = GcpClient::new(TokenSource::Anonymous, 0, Duration::ZERO).unwrap();
        PubSubClient::new(Arc::new(gcp), &server.url())
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(
            PubSubClient::subscription_path("my-project", "ci-events"),
            "projects/my-project/subscriptions/ci-events"
        );
        assert_eq!(
            PubSubClient::topic_path("my-project", "origin-ci-test"),
            "projects/my-project/topics/origin-ci-test"
        );
    }

    #[tokio::test]
    async fn test_pull_decodes_messages() {
        let mut server = mockito::Server::new_async().await;
        let data = STANDARD.encode(r#"{"name":"pr-logs/pull/a_b/1/job/2/finished.json"}"#);
        let body = format!(
            r#"{{"receivedMessages":[{{"ackId":"ack-1","message":{{"data":"{data}","messageId":"42","publishTime":"2021-03-01T10:00:00Z"}}}}]}}"#
        );
        let mock = server
            .mock("POST", "/v1/projects/p/subscriptions/s:pull")
            .match_body(Matcher::Json(serde_json::json!({"maxMessages": 10})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let messages = client(&server)
            .pull("projects/p/subscriptions/s", 10)
            .await
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].ack_id, "ack-1");
        assert_eq!(messages[0].message.message_id, "42");
        let payload = String::from_utf8(messages[0].message.payload().unwrap()).unwrap();
        assert!(payload.contains("finished.json"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pull_with_nothing_pending() {
        let mut server = mockito::Server::new_async().await;
        let _pull = server
            .mock("POST", "/v1/projects/p/subscriptions/s:pull")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let messages = client(&server)
            .pull("projects/p/subscriptions/s", 10)
            .await
            .unwrap();

        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_posts_ack_ids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/p/subscriptions/s:acknowledge")
            .match_body(Matcher::Json(serde_json::json!({"ackIds": ["a", "b"]})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let pubsub = client(&server);
        pubsub
            .acknowledge("projects/p/subscriptions/s", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        // Nothing to send for an empty batch.
        pubsub.acknowledge("projects/p/subscriptions/s", &[]).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_subscriptions_follows_pages() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/v1/projects/p/subscriptions")
            .match_query(Matcher::Regex("^$".into()))
            .with_status(200)
            .with_body(
                r#"{"subscriptions":[{"name":"projects/p/subscriptions/one","topic":"projects/p/topics/t"}],"nextPageToken":"page-2"}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v1/projects/p/subscriptions")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "page-2".into()))
            .with_status(200)
            .with_body(r#"{"subscriptions":[{"name":"projects/p/subscriptions/two"}]}"#)
            .create_async()
            .await;

        let subscriptions = client(&server).list_subscriptions("p").await.unwrap();

        let names: Vec<_> = subscriptions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["projects/p/subscriptions/one", "projects/p/subscriptions/two"]
        );
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_topic_subscriptions() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/v1/projects/p/topics/t/subscriptions")
            .with_status(200)
            .with_body(r#"{"subscriptions":["projects/p/subscriptions/one"]}"#)
            .create_async()
            .await;

        let subscriptions = client(&server)
            .list_topic_subscriptions("projects/p/topics/t")
            .await
            .unwrap();

        assert_eq!(subscriptions, vec!["projects/p/subscriptions/one"]);
    }
}
