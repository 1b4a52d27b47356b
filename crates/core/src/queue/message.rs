use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Delivery, OutgoingMessage, Publisher, QueueError};
use crate::job::JobRequest;

/// Wire format of a zip request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipRequestMessage {
    pub tags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Always `"zip"` when we publish; not checked on receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// Why a delivery could not be turned into a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("payload is not UTF-8: {0}")]
    Utf8(String),

    #[error("invalid request payload: {0}")]
    Json(String),

    #[error("request has no tags")]
    EmptyTags,
}

/// Decode a delivery into a job request.
///
/// `tags` must be a non-blank string and is kept verbatim. An unparseable
/// timestamp falls back to the publish time.
pub fn decode_request(delivery: &Delivery) -> Result<JobRequest, MalformedMessage> {
    let text =
        std::str::from_utf8(&delivery.data).map_err(|e| MalformedMessage::Utf8(e.to_string()))?;
    let message: ZipRequestMessage =
        serde_json::from_str(text).map_err(|e| MalformedMessage::Json(e.to_string()))?;

    if message.tags.trim().is_empty() {
        return Err(MalformedMessage::EmptyTags);
    }

    let submitted_at = message
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or(delivery.publish_time)
        .unwrap_or_else(Utc::now);

    Ok(JobRequest {
        tags: message.tags,
        submitted_at,
        message_id: Some(delivery.message_id.clone()),
    })
}

/// Build the outgoing message for a zip request.
pub fn encode_request(tags: &str) -> OutgoingMessage {
    let message = ZipRequestMessage {
        tags: tags.to_string(),
        timestamp: Some(Utc::now().to_rfc3339()),
        action: Some("zip".to_string()),
    };

    let attributes = HashMap::from([
        ("origin".to_string(), "web-app".to_string()),
        ("type".to_string(), "zip-request".to_string()),
    ]);

    OutgoingMessage {
        // Serializing a struct of strings cannot fail
        data: serde_json::to_vec(&message).unwrap_or_default(),
        attributes,
    }
}

/// Queue a zip request for `tags` and return the message id.
pub async fn publish_zip_request(publisher: &dyn Publisher, tags: &str) -> Result<String, QueueError> {
    let message_id = publisher.publish(encode_request(tags)).await?;
    tracing::info!(tags = %tags, topic = publisher.topic(), message_id = %message_id, "Zip request published");
    Ok(message_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(data: &[u8]) -> Delivery {
        Delivery {
            ack_id: "ack-1".to_string(),
            message_id: "m-1".to_string(),
            data: data.to_vec(),
            attributes: HashMap::new(),
            publish_time: None,
            delivery_attempt: 1,
        }
    }

    #[test]
    fn test_decode_valid_request() {
        let request = decode_request(&delivery(
            br#"{"tags":"sunset,beach","timestamp":"2024-05-01T10:00:00.000Z","action":"zip"}"#,
        ))
        .unwrap();

        assert_eq!(request.tags, "sunset,beach");
        assert_eq!(request.submitted_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(request.message_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_decode_keeps_tags_verbatim() {
        let request = decode_request(&delivery(br#"{"tags":" b, a "}"#)).unwrap();
        assert_eq!(request.tags, " b, a ");
    }

    #[test]
    fn test_decode_falls_back_to_publish_time() {
        let mut d = delivery(br#"{"tags":"cats","timestamp":"yesterday"}"#);
        let published = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        d.publish_time = Some(published);

        assert_eq!(decode_request(&d).unwrap().submitted_at, published);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_request(&delivery(&[0xff, 0xfe, 0x00])),
            Err(MalformedMessage::Utf8(_))
        ));
        assert!(matches!(
            decode_request(&delivery(b"not json")),
            Err(MalformedMessage::Json(_))
        ));
        assert!(matches!(
            decode_request(&delivery(br#"{"action":"zip"}"#)),
            Err(MalformedMessage::Json(_))
        ));
        assert!(matches!(
            decode_request(&delivery(br#"{"tags":42}"#)),
            Err(MalformedMessage::Json(_))
        ));
        assert_eq!(
            decode_request(&delivery(br#"{"tags":"  "}"#)),
            Err(MalformedMessage::EmptyTags)
        );
    }

    #[test]
    fn test_encode_request() {
        let message = encode_request("sunset,beach");
        assert_eq!(message.attributes["origin"], "web-app");
        assert_eq!(message.attributes["type"], "zip-request");

        let json: serde_json::Value = serde_json::from_slice(&message.data).unwrap();
        assert_eq!(json["tags"], "sunset,beach");
        assert_eq!(json["action"], "zip");
        assert!(DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }
}
