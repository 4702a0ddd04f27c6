use std::fmt;
use std::time::{Duration, Instant};

use log::debug;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{OcpciError, Result};

/// Refresh metadata-server tokens this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const METADATA_TOKEN_PATH: &str =
    "computeMetadata/v1/instance/service-accounts/default/token";

/// OAuth2 bearer token for Google Cloud APIs.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// Never print the secret itself.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// Where request credentials come from.
///
/// The public `origin-ci-test` bucket can be read anonymously, but Pub/Sub
/// always needs a token: either one passed in explicitly or one minted by the
/// GCE metadata server of the instance we run on.
pub enum TokenSource {
    Anonymous,
    Static(Token),
    Metadata {
        token_url: String,
        cached: Mutex<Option<(Token, Instant)>>,
    },
}

impl TokenSource {
    pub fn metadata(metadata_url: &str) -> Self {
        Self::Metadata {
            token_url: format!(
                "{}/{METADATA_TOKEN_PATH}",
                metadata_url.trim_end_matches('/')
            ),
            cached: Mutex::new(None),
        }
    }

    /// Returns the current token, refreshing a metadata token when it is
    /// about to expire.
    pub async fn token(&self, client: &Client) -> Result<Option<Token>> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Static(token) => Ok(Some(token.clone())),
            Self::Metadata { token_url, cached } => {
                let mut cached = cached.lock().await;

                if let Some((token, expires_at)) = cached.as_ref() {
                    if Instant::now() + EXPIRY_MARGIN < *expires_at {
                        return Ok(Some(token.clone()));
                    }
                }

                debug!("Fetching access token from metadata server");
                let response = client
                    .get(token_url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(OcpciError::Auth(format!(
                        "metadata server returned status {}",
                        response.status()
                    )));
                }

                let fresh: MetadataToken = response.json().await?;
                let token = Token::from(fresh.access_token);
                *cached = Some((
                    token.clone(),
                    Instant::now() + Duration::from_secs(fresh.expires_in),
                ));

                Ok(Some(token))
            }
        }
    }

    /// Attaches the bearer token, if any, to `request`.
    pub async fn authorize(
        &self,
        client: &Client,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        Ok(match self.token(client).await? {
            Some(token) => request.bearer_auth(token.as_str()),
            None => request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_is_redacted() {
        let token = Token::from("ya29.secret");
        assert_eq!(format!("{token:?}"), "Token(***)");
        assert_eq!(token.as_str(), "ya29.secret");
    }

    #[tokio::test]
    async fn test_static_and_anonymous_sources() {
        let client = Client::new();

        let anonymous = TokenSource::Anonymous;
        assert!(anonymous.token(&client).await.unwrap().is_none());

        let fixed = TokenSource::Static(Token::from("abc"));
        assert_eq!(
            fixed.token(&client).await.unwrap(),
            Some(Token::from("abc"))
        );
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/computeMetadata/v1/instance/service-accounts/default/token")
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.meta","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = Client::new();
        let source = TokenSource::metadata(&server.url());

        let first = source.token(&client).await.unwrap();
        let second = source.token(&client).await.unwrap();

        assert_eq!(first, Some(Token::from("ya29.meta")));
        assert_eq!(first, second);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metadata_server_failure() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("GET", "/computeMetadata/v1/instance/service-accounts/default/token")
            .with_status(404)
            .create_async()
            .await;

        let source = TokenSource::metadata(&server.url());
        let result = source.token(&Client::new()).await;

        assert!(matches!(result, Err(OcpciError::Auth(_))));
    }
}
