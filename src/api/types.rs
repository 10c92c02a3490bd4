//! Wire models for the queue API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// A message queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
  pub id: u64,
  pub name: String,
  #[serde(default)]
  pub description: String,
  /// fifo, priority, delay, ...
  #[serde(rename = "type")]
  pub queue_type: String,
  /// JSON configuration blob
  #[serde(default)]
  pub config: String,
  pub is_active: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
  Pending,
  Processing,
  Completed,
  Failed,
  /// Any status this client does not know about
  #[serde(other)]
  Unknown,
}

/// A message in a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub id: u64,
  pub queue_id: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub queue: Option<Queue>,
  pub payload: String,
  #[serde(default)]
  pub priority: i32,
  pub status: MessageStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub processed_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default)]
  pub max_retries: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
  Idle,
  Busy,
  Stopped,
  #[serde(other)]
  Unknown,
}

impl WorkerStatus {
  /// Idle and busy workers count as active on the dashboard.
  pub fn is_active(&self) -> bool {
    matches!(self, Self::Idle | Self::Busy)
  }
}

/// A queue worker/consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
  pub id: u64,
  pub name: String,
  pub queue_id: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub queue: Option<Queue>,
  pub status: WorkerStatus,
  pub last_ping: DateTime<Utc>,
  #[serde(default)]
  pub processed_count: u64,
  #[serde(default)]
  pub failed_count: u64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateQueueRequest {
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(rename = "type")]
  pub queue_type: String,
  #[serde(default)]
  pub config: String,
}

impl CreateQueueRequest {
  pub fn validate(&self) -> SyncResult<()> {
    if self.name.trim().is_empty() {
      return Err(SyncError::validation("queue name is required"));
    }
    if self.queue_type.trim().is_empty() {
      return Err(SyncError::validation("queue type is required"));
    }
    if !self.config.trim().is_empty()
      && serde_json::from_str::<serde_json::Value>(&self.config).is_err()
    {
      return Err(SyncError::validation("queue config must be valid JSON"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
  pub queue_id: u64,
  pub payload: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<i32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scheduled_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
}

impl CreateMessageRequest {
  pub fn validate(&self) -> SyncResult<()> {
    if self.queue_id == 0 {
      return Err(SyncError::validation("queue_id must be positive"));
    }
    if self.payload.is_empty() {
      return Err(SyncError::validation("message payload is required"));
    }
    Ok(())
  }
}

/// Query parameters for listing messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFilter {
  pub queue_id: Option<u64>,
  pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_queue_from_api_json() {
    let json = r#"{
      "id": 7,
      "name": "orders",
      "description": "order events",
      "type": "fifo",
      "config": "{}",
      "is_active": true,
      "created_at": "2024-05-01T10:00:00Z",
      "updated_at": "2024-05-01T10:00:00Z"
    }"#;
    let queue: Queue = serde_json::from_str(json).unwrap();
    assert_eq!(queue.id, 7);
    assert_eq!(queue.queue_type, "fifo");
  }

  #[test]
  fn test_message_optional_fields() {
    let json = r#"{
      "id": 1,
      "queue_id": 7,
      "payload": "{\"order\":1}",
      "priority": 0,
      "status": "pending",
      "retry_count": 0,
      "max_retries": 3,
      "created_at": "2024-05-01T10:00:00Z",
      "updated_at": "2024-05-01T10:00:00Z"
    }"#;
    let message: Message = serde_json::from_str(json).unwrap();
    assert_eq!(message.status, MessageStatus::Pending);
    assert!(message.queue.is_none());
    assert!(message.error_message.is_none());
  }

  #[test]
  fn test_create_queue_validation() {
    let mut request = CreateQueueRequest {
      name: "orders".into(),
      description: String::new(),
      queue_type: "fifo".into(),
      config: String::new(),
    };
    assert!(request.validate().is_ok());

    request.config = "{not json".into();
    assert!(matches!(request.validate(), Err(SyncError::Validation(_))));

    request.config = String::new();
    request.name = "  ".into();
    assert!(request.validate().is_err());
  }

  #[test]
  fn test_create_message_validation() {
    let request = CreateMessageRequest {
      queue_id: 0,
      payload: "x".into(),
      priority: None,
      scheduled_at: None,
      max_retries: None,
    };
    assert!(request.validate().is_err());

    let serialized = serde_json::to_value(CreateMessageRequest {
      queue_id: 7,
      ..request
    })
    .unwrap();
    assert_eq!(serialized, serde_json::json!({"queue_id": 7, "payload": "x"}));
  }

  #[test]
  fn test_active_workers() {
    assert!(WorkerStatus::Idle.is_active());
    assert!(WorkerStatus::Busy.is_active());
    assert!(!WorkerStatus::Stopped.is_active());
    assert!(!WorkerStatus::Unknown.is_active());
  }

  #[test]
  fn test_unexpected_status_does_not_fail_decode() {
    let messages: Vec<Message> = serde_json::from_str(
      r#"[{
        "id": 1,
        "queue_id": 7,
        "payload": "x",
        "status": "dead-lettered",
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z"
      }]"#,
    )
    .unwrap();
    assert_eq!(messages[0].status, MessageStatus::Unknown);

    let status: WorkerStatus = serde_json::from_str(r#""paused""#).unwrap();
    assert_eq!(status, WorkerStatus::Unknown);
  }
}
