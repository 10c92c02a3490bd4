use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::api::types::{
  CreateMessageRequest, CreateQueueRequest, Message, MessageFilter, Queue, Worker,
};
use crate::config::ApiConfig;
use crate::error::{SyncError, SyncResult};

/// Remote read/write contract of the queue API.
#[async_trait]
pub trait QueueApi: Send + Sync {
  async fn list_queues(&self) -> SyncResult<Vec<Queue>>;
  async fn get_queue(&self, id: u64) -> SyncResult<Queue>;
  async fn create_queue(&self, request: &CreateQueueRequest) -> SyncResult<Queue>;
  async fn delete_queue(&self, id: u64) -> SyncResult<()>;
  async fn list_messages(&self, filter: MessageFilter) -> SyncResult<Vec<Message>>;
  async fn create_message(&self, request: &CreateMessageRequest) -> SyncResult<Message>;
  async fn list_workers(&self, queue_id: Option<u64>) -> SyncResult<Vec<Worker>>;
}

/// REST client for the queue API (`{url}/api/v1`)
#[derive(Clone)]
pub struct RestClient {
  client: reqwest::Client,
  base_url: Url,
  timeout: Duration,
}

impl RestClient {
  pub fn new(config: &ApiConfig) -> SyncResult<Self> {
    let timeout = config.request_timeout();
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::transport(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: api_base(&config.url)?,
      timeout,
    })
  }

  fn endpoint(&self, path: &str) -> SyncResult<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| SyncError::validation(format!("Invalid endpoint {}: {}", path, e)))
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    debug!(%method, %url, "api request");
    self.client.request(method, url)
  }

  async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
    let response = request.send().await.map_err(|e| self.map_error(e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
      code: status.as_u16(),
      message: error_message(&body, status.canonical_reason()),
    })
  }

  async fn get_json<T: DeserializeOwned>(&self, url: Url) -> SyncResult<T> {
    let response = self.send(self.request(Method::GET, url)).await?;
    response.json().await.map_err(|e| self.map_error(e))
  }

  async fn get_list<T: DeserializeOwned>(&self, url: Url) -> SyncResult<Vec<T>> {
    let response = self.send(self.request(Method::GET, url)).await?;
    let body = response.text().await.map_err(|e| self.map_error(e))?;
    parse_list(&body)
  }

  async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
    &self,
    url: Url,
    body: &B,
  ) -> SyncResult<T> {
    let response = self
      .send(self.request(Method::POST, url).json(body))
      .await?;
    response.json().await.map_err(|e| self.map_error(e))
  }

  fn map_error(&self, error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
      SyncError::Timeout(self.timeout)
    } else if error.is_decode() {
      SyncError::transport(format!("Failed to decode response: {}", error))
    } else {
      SyncError::transport(error.to_string())
    }
  }
}

#[async_trait]
impl QueueApi for RestClient {
  async fn list_queues(&self) -> SyncResult<Vec<Queue>> {
    self.get_list(self.endpoint("queues")?).await
  }

  async fn get_queue(&self, id: u64) -> SyncResult<Queue> {
    self.get_json(self.endpoint(&format!("queues/{}", id))?).await
  }

  async fn create_queue(&self, request: &CreateQueueRequest) -> SyncResult<Queue> {
    self.post_json(self.endpoint("queues")?, request).await
  }

  async fn delete_queue(&self, id: u64) -> SyncResult<()> {
    let url = self.endpoint(&format!("queues/{}", id))?;
    self.send(self.request(Method::DELETE, url)).await?;
    Ok(())
  }

  async fn list_messages(&self, filter: MessageFilter) -> SyncResult<Vec<Message>> {
    let mut url = self.endpoint("messages")?;
    {
      let mut query = url.query_pairs_mut();
      if let Some(queue_id) = filter.queue_id {
        query.append_pair("queue_id", &queue_id.to_string());
      }
      if let Some(limit) = filter.limit {
        query.append_pair("limit", &limit.to_string());
      }
    }
    self.get_list(url).await
  }

  async fn create_message(&self, request: &CreateMessageRequest) -> SyncResult<Message> {
    self.post_json(self.endpoint("messages")?, request).await
  }

  async fn list_workers(&self, queue_id: Option<u64>) -> SyncResult<Vec<Worker>> {
    let mut url = self.endpoint("workers")?;
    if let Some(queue_id) = queue_id {
      url
        .query_pairs_mut()
        .append_pair("queue_id", &queue_id.to_string());
    }
    self.get_list(url).await
  }
}

/// Normalize a server URL into the versioned API base, always ending in `/`
fn api_base(server: &str) -> SyncResult<Url> {
  let mut url = Url::parse(server)
    .map_err(|e| SyncError::validation(format!("Invalid API URL {}: {}", server, e)))?;
  let path = format!("{}/api/v1/", url.path().trim_end_matches('/'));
  url.set_path(&path);
  Ok(url)
}

/// Decode a list body. The backend answers `null` when a list is empty.
fn parse_list<T: DeserializeOwned>(body: &str) -> SyncResult<Vec<T>> {
  serde_json::from_str::<Option<Vec<T>>>(body)
    .map(Option::unwrap_or_default)
    .map_err(|e| SyncError::transport(format!("Failed to decode response: {}", e)))
}

/// Pull a human-readable message out of an error body.
///
/// The API answers errors as `{"message": "..."}`; anything else is passed through.
fn error_message(body: &str, reason: Option<&str>) -> String {
  #[derive(serde::Deserialize)]
  struct ErrorBody {
    message: String,
  }

  if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
    return parsed.message;
  }
  let trimmed = body.trim();
  if trimmed.is_empty() {
    reason.unwrap_or("request failed").to_string()
  } else {
    trimmed.to_string()
  }
}
