//! Google Cloud Pub/Sub over its REST API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Delivery, OutgoingMessage, PubSubConfig, Publisher, QueueError, Subscription};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    #[serde(default, skip_serializing)]
    message_id: String,
    #[serde(default, skip_serializing)]
    publish_time: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u32,
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

fn map_reqwest_error(e: reqwest::Error) -> QueueError {
    if e.is_timeout() {
        QueueError::Timeout
    } else if e.is_connect() {
        QueueError::ConnectionFailed(e.to_string())
    } else {
        QueueError::ApiError(e.to_string())
    }
}

impl From<ReceivedMessage> for Delivery {
    fn from(received: ReceivedMessage) -> Self {
        let message = received.message;
        // Undecodable data is passed on empty and rejected as malformed downstream
        let data = BASE64.decode(message.data.as_bytes()).unwrap_or_else(|e| {
            warn!(message_id = %message.message_id, error = %e, "Message data is not valid base64");
            Vec::new()
        });
        let publish_time = message
            .publish_time
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        Delivery {
            ack_id: received.ack_id,
            message_id: message.message_id,
            data,
            attributes: message.attributes,
            publish_time,
            delivery_attempt: received.delivery_attempt.unwrap_or(1),
        }
    }
}

/// Longest ack deadline Pub/Sub accepts, in seconds.
const MAX_ACK_DEADLINE_SECS: u64 = 600;

/// Pub/Sub client bound to one topic and one subscription.
pub struct PubSubClient {
    client: Client,
    config: PubSubConfig,
    topic: String,
    subscription: String,
}

impl PubSubClient {
    pub fn new(
        config: PubSubConfig,
        topic: impl Into<String>,
        subscription: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QueueError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            topic: topic.into(),
            subscription: subscription.into(),
        })
    }

    fn url(&self, resource: &str) -> String {
        format!(
            "{}/v1/projects/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.project_id,
            resource
        )
    }

    fn subscription_url(&self, method: &str) -> String {
        self.url(&format!("subscriptions/{}:{}", self.subscription, method))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.access_token.as_deref() {
            Some(token) if !token.is_empty() => request.bearer_auth(token),
            _ => request,
        }
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, QueueError> {
        let response = self
            .authorize(self.client.post(url).json(body))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, QueueError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(QueueError::ApiError(format!(
        "HTTP {}: {}",
        status,
        body.chars().take(200).collect::<String>()
    )))
}

#[async_trait]
impl Subscription for PubSubClient {
    fn name(&self) -> &str {
        &self.subscription
    }

    async fn pull(&self, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let max_messages = (max as u32).clamp(1, self.config.max_messages.max(1));
        let response = self
            .post(&self.subscription_url("pull"), &PullRequest { max_messages })
            .await?;
        let pulled: PullResponse = response
            .json()
            .await
            .map_err(|e| QueueError::ApiError(format!("Failed to parse pull response: {}", e)))?;

        debug!(
            subscription = %self.subscription,
            count = pulled.received_messages.len(),
            "Pulled messages"
        );
        Ok(pulled.received_messages.into_iter().map(Delivery::from).collect())
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(&self.subscription_url("acknowledge"), &AckRequest { ack_ids })
            .await?;
        Ok(())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        // A zero deadline makes the messages immediately available again
        self.post(
            &self.subscription_url("modifyAckDeadline"),
            &ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: 0,
            },
        )
        .await?;
        Ok(())
    }

    async fn extend_deadline(&self, ack_ids: &[String], deadline: Duration) -> Result<(), QueueError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(
            &self.subscription_url("modifyAckDeadline"),
            &ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: ack_deadline_seconds(deadline),
            },
        )
        .await?;
        Ok(())
    }
}

/// Whole seconds, rounded up, within the range Pub/Sub accepts.
fn ack_deadline_seconds(deadline: Duration) -> u32 {
    let secs = deadline.as_secs() + u64::from(deadline.subsec_nanos() > 0);
    secs.clamp(1, MAX_ACK_DEADLINE_SECS) as u32
}

#[async_trait]
impl Publisher for PubSubClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn publish(&self, message: OutgoingMessage) -> Result<String, QueueError> {
        let request = PublishRequest {
            messages: vec![PubsubMessage {
                data: BASE64.encode(&message.data),
                attributes: message.attributes,
                message_id: String::new(),
                publish_time: None,
            }],
        };
        let response = self
            .post(&self.url(&format!("topics/{}:publish", self.topic)), &request)
            .await?;
        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| QueueError::ApiError(format!("Failed to parse publish response: {}", e)))?;

        published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::ApiError("publish returned no message id".to_string()))
    }

    async fn topic_exists(&self) -> Result<bool, QueueError> {
        let url = self.url(&format!("topics/{}", self.topic));
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(response).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(api_base: &str) -> PubSubConfig {
        PubSubConfig {
            project_id: "demo".to_string(),
            api_base: api_base.to_string(),
            access_token: Some("token-123".to_string()),
            max_messages: 10,
            timeout_secs: 5,
        }
    }

    /// Answer one request with `status` and a JSON body; returns the base URL
    /// and a handle yielding the raw request text.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_urls() {
        let client = PubSubClient::new(config("https://pubsub.googleapis.com/"), "dmii-2", "dmii-2-sub").unwrap();
        assert_eq!(
            client.subscription_url("pull"),
            "https://pubsub.googleapis.com/v1/projects/demo/subscriptions/dmii-2-sub:pull"
        );
        assert_eq!(
            client.url("topics/dmii-2:publish"),
            "https://pubsub.googleapis.com/v1/projects/demo/topics/dmii-2:publish"
        );
    }

    #[test]
    fn test_received_message_to_delivery() {
        let json = format!(
            r#"{{"receivedMessages":[{{"ackId":"A1","deliveryAttempt":3,"message":{{"data":"{}","attributes":{{"origin":"web-app"}},"messageId":"42","publishTime":"2024-05-01T10:00:00.123Z"}}}}]}}"#,
            BASE64.encode(br#"{"tags":"cats"}"#)
        );
        let pulled: PullResponse = serde_json::from_str(&json).unwrap();
        let delivery = Delivery::from(pulled.received_messages.into_iter().next().unwrap());

        assert_eq!(delivery.ack_id, "A1");
        assert_eq!(delivery.message_id, "42");
        assert_eq!(delivery.data, br#"{"tags":"cats"}"#);
        assert_eq!(delivery.attributes["origin"], "web-app");
        assert_eq!(delivery.delivery_attempt, 3);
        assert!(delivery.publish_time.is_some());
    }

    #[test]
    fn test_empty_pull_response() {
        let pulled: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(pulled.received_messages.is_empty());
    }

    #[test]
    fn test_invalid_base64_becomes_empty_payload() {
        let received: ReceivedMessage = serde_json::from_str(
            r#"{"ackId":"A","message":{"data":"***","messageId":"1"}}"#,
        )
        .unwrap();
        assert!(Delivery::from(received).data.is_empty());
    }

    #[tokio::test]
    async fn test_pull_over_http() {
        let body = format!(
            r#"{{"receivedMessages":[{{"ackId":"A1","message":{{"data":"{}","messageId":"7"}}}}]}}"#,
            BASE64.encode(b"hello")
        );
        let (base, request) = serve_once("200 OK", body).await;
        let client = PubSubClient::new(config(&base), "t", "s").unwrap();

        let deliveries = client.pull(50).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].data, b"hello");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/projects/demo/subscriptions/s:pull"));
        assert!(raw.to_lowercase().contains("authorization: bearer token-123"));
        assert!(raw.contains(r#""maxMessages":10"#));
    }

    #[test]
    fn test_ack_deadline_seconds_rounds_up_and_clamps() {
        assert_eq!(ack_deadline_seconds(Duration::from_secs(60)), 60);
        assert_eq!(ack_deadline_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ack_deadline_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ack_deadline_seconds(Duration::from_secs(3600)), 600);
    }

    #[tokio::test]
    async fn test_extend_deadline_over_http() {
        let (base, request) = serve_once("200 OK", "{}".to_string()).await;
        let client = PubSubClient::new(config(&base), "t", "s").unwrap();

        client
            .extend_deadline(&["A1".to_string()], Duration::from_secs(60))
            .await
            .unwrap();

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/projects/demo/subscriptions/s:modifyAckDeadline"));
        assert!(raw.contains(r#""ackDeadlineSeconds":60"#));
        assert!(raw.contains("A1"));
    }

    #[tokio::test]
    async fn test_publish_over_http() {
        let (base, request) = serve_once("200 OK", r#"{"messageIds":["99"]}"#.to_string()).await;
        let client = PubSubClient::new(config(&base), "dmii-1", "s").unwrap();

        let id = client
            .publish(OutgoingMessage {
                data: b"payload".to_vec(),
                attributes: HashMap::from([("type".to_string(), "zip-request".to_string())]),
            })
            .await
            .unwrap();
        assert_eq!(id, "99");

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /v1/projects/demo/topics/dmii-1:publish"));
        assert!(raw.contains(&BASE64.encode(b"payload")));
        assert!(raw.contains("zip-request"));
    }

    #[tokio::test]
    async fn test_topic_exists_not_found() {
        let (base, _request) = serve_once("404 Not Found", "{}".to_string()).await;
        let client = PubSubClient::new(config(&base), "missing", "s").unwrap();
        assert!(!client.topic_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let (base, _request) =
            serve_once("403 Forbidden", r#"{"error":"denied"}"#.to_string()).await;
        let client = PubSubClient::new(config(&base), "t", "s").unwrap();

        let result = client.ack(&["A1".to_string()]).await;
        assert!(matches!(result, Err(QueueError::ApiError(msg)) if msg.contains("403")));
    }
}
