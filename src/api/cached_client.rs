//! Cached queue client that wraps a `QueueApi` with the synchronization core.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
  CacheConfig, InvalidationBus, Mutation, MutationCoordinator, QueryCache, QueryCoordinator,
  QueryObserver,
};
use crate::error::{SyncError, SyncResult};
use crate::key::{KeyPattern, ResourceKey, ResourceKind};

use super::client::QueueApi;
use super::types::{
  CreateMessageRequest, CreateQueueRequest, Message, MessageFilter, Queue, Worker,
};

/// Every payload the dashboard caches.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
  Queues(Vec<Queue>),
  Queue(Queue),
  Messages(Vec<Message>),
  Workers(Vec<Worker>),
}

impl Resource {
  pub fn as_queues(&self) -> Option<&[Queue]> {
    match self {
      Self::Queues(queues) => Some(queues),
      _ => None,
    }
  }

  pub fn as_queue(&self) -> Option<&Queue> {
    match self {
      Self::Queue(queue) => Some(queue),
      _ => None,
    }
  }

  pub fn as_messages(&self) -> Option<&[Message]> {
    match self {
      Self::Messages(messages) => Some(messages),
      _ => None,
    }
  }

  pub fn as_workers(&self) -> Option<&[Worker]> {
    match self {
      Self::Workers(workers) => Some(workers),
      _ => None,
    }
  }

  /// Number of items, for status lines
  pub fn len(&self) -> usize {
    match self {
      Self::Queues(queues) => queues.len(),
      Self::Queue(_) => 1,
      Self::Messages(messages) => messages.len(),
      Self::Workers(workers) => workers.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Queue API client with transparent caching.
///
/// Reads go through the query coordinator keyed by [`ResourceKey`]; writes go
/// through the mutation coordinator with the keys they invalidate:
///
/// | write          | invalidates                 |
/// |----------------|-----------------------------|
/// | create queue   | queue list                  |
/// | delete queue   | queue list, that queue      |
/// | create message | every message list          |
#[derive(Clone)]
pub struct CachedQueueClient {
  api: Arc<dyn QueueApi>,
  queries: QueryCoordinator<Resource>,
  mutations: MutationCoordinator<Resource>,
  create_queue: Mutation<CreateQueueRequest, Queue>,
  delete_queue: Mutation<u64, ()>,
  create_message: Mutation<CreateMessageRequest, Message>,
}

impl CachedQueueClient {
  pub fn new(api: Arc<dyn QueueApi>, config: CacheConfig) -> Self {
    let cache = QueryCache::new(config);
    let bus = InvalidationBus::new();

    let create_queue = {
      let api = api.clone();
      Mutation::new("create-queue", move |request: CreateQueueRequest| {
        let api = api.clone();
        async move { api.create_queue(&request).await }
      })
      .invalidates(vec![KeyPattern::kind(ResourceKind::QueueList)])
    };

    let delete_queue = {
      let api = api.clone();
      Mutation::new("delete-queue", move |id: u64| {
        let api = api.clone();
        async move { api.delete_queue(id).await }
      })
      .invalidates_with(|id: &u64| {
        let mut patterns = vec![KeyPattern::kind(ResourceKind::QueueList)];
        if let Ok(key) = ResourceKey::queue(*id) {
          patterns.push(KeyPattern::prefix(&key));
        }
        patterns
      })
    };

    // Blanket: a new message may appear in any filtered message list
    let create_message = {
      let api = api.clone();
      Mutation::new("create-message", move |request: CreateMessageRequest| {
        let api = api.clone();
        async move { api.create_message(&request).await }
      })
      .invalidates(vec![KeyPattern::kind(ResourceKind::MessageList)])
    };

    Self {
      api,
      queries: QueryCoordinator::new(cache.clone()),
      mutations: MutationCoordinator::new(cache, bus),
      create_queue,
      delete_queue,
      create_message,
    }
  }

  pub fn cache(&self) -> &QueryCache<Resource> {
    self.queries.cache()
  }

  pub fn bus(&self) -> &InvalidationBus {
    self.mutations.bus()
  }

  fn stale_after(&self, key: &ResourceKey) -> Duration {
    self.cache().config().stale_after_for(key.kind())
  }

  /// Fetcher for a key, dispatching on its kind.
  fn fetcher_for(
    &self,
    key: &ResourceKey,
  ) -> impl Fn() -> futures::future::BoxFuture<'static, SyncResult<Resource>> + Send + Sync + 'static
  {
    use futures::FutureExt;

    let api = self.api.clone();
    let key = key.clone();
    move || {
      let api = api.clone();
      let key = key.clone();
      async move {
        match key.kind() {
          ResourceKind::QueueList => api.list_queues().await.map(Resource::Queues),
          ResourceKind::Queue => {
            let id = key
              .id()
              .ok_or_else(|| SyncError::validation("queue key without id"))?;
            api.get_queue(id).await.map(Resource::Queue)
          }
          ResourceKind::MessageList => {
            let filter = MessageFilter {
              queue_id: key.queue_filter(),
              limit: key.limit_filter(),
            };
            api.list_messages(filter).await.map(Resource::Messages)
          }
          ResourceKind::WorkerList => api
            .list_workers(key.queue_filter())
            .await
            .map(Resource::Workers),
        }
      }
      .boxed()
    }
  }

  async fn read(&self, key: &ResourceKey) -> SyncResult<Arc<Resource>> {
    self
      .queries
      .fetch(key, self.stale_after(key), self.fetcher_for(key))
      .await
  }

  /// Mount an observer on a key for a long-lived view.
  pub fn observe(&self, key: ResourceKey) -> QueryObserver<Resource> {
    let stale_after = self.stale_after(&key);
    let fetcher = self.fetcher_for(&key);
    self.queries.subscribe(key, stale_after, fetcher)
  }

  /// Get all queues with caching.
  pub async fn queues(&self) -> SyncResult<Vec<Queue>> {
    let key = ResourceKey::queue_list();
    let resource = self.read(&key).await?;
    resource
      .as_queues()
      .map(<[Queue]>::to_vec)
      .ok_or_else(|| unexpected(&key))
  }

  /// Get a single queue by id with caching.
  pub async fn queue(&self, id: u64) -> SyncResult<Queue> {
    let key = ResourceKey::queue(id)?;
    let resource = self.read(&key).await?;
    resource.as_queue().cloned().ok_or_else(|| unexpected(&key))
  }

  /// Get messages, optionally for one queue and capped in count, with caching.
  pub async fn messages(&self, queue_id: Option<u64>, limit: Option<u32>) -> SyncResult<Vec<Message>> {
    let key = ResourceKey::messages(queue_id, limit)?;
    let resource = self.read(&key).await?;
    resource
      .as_messages()
      .map(<[Message]>::to_vec)
      .ok_or_else(|| unexpected(&key))
  }

  /// Get workers, optionally for one queue, with caching.
  pub async fn workers(&self, queue_id: Option<u64>) -> SyncResult<Vec<Worker>> {
    let key = ResourceKey::workers(queue_id)?;
    let resource = self.read(&key).await?;
    resource
      .as_workers()
      .map(<[Worker]>::to_vec)
      .ok_or_else(|| unexpected(&key))
  }

  /// Create a queue (write operation, not cached).
  pub async fn create_queue(&self, request: CreateQueueRequest) -> SyncResult<Queue> {
    request.validate()?;
    self.mutations.invoke(&self.create_queue, request).await
  }

  /// Delete a queue (write operation, not cached).
  pub async fn delete_queue(&self, id: u64) -> SyncResult<()> {
    ResourceKey::queue(id)?;
    self.mutations.invoke(&self.delete_queue, id).await
  }

  /// Enqueue a message (write operation, not cached).
  pub async fn create_message(&self, request: CreateMessageRequest) -> SyncResult<Message> {
    request.validate()?;
    self.mutations.invoke(&self.create_message, request).await
  }
}

fn unexpected(key: &ResourceKey) -> SyncError {
  SyncError::transport(format!("cached value for {} has an unexpected shape", key))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{MessageStatus, WorkerStatus};
  use crate::cache::EntryStatus;
  use async_trait::async_trait;
  use chrono::Utc;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex;

  /// In-memory queue API that counts calls per operation
  #[derive(Default)]
  struct FakeApi {
    queues: Mutex<Vec<Queue>>,
    messages: Mutex<Vec<Message>>,
    list_queue_calls: AtomicU32,
    get_queue_calls: AtomicU32,
    list_message_calls: AtomicU32,
    write_calls: AtomicU32,
    fail_writes: bool,
  }

  fn queue(id: u64, name: &str) -> Queue {
    Queue {
      id,
      name: name.to_string(),
      description: String::new(),
      queue_type: "fifo".to_string(),
      config: String::new(),
      is_active: true,
      created_at: Utc::now(),
      updated_at: Utc::now(),
    }
  }

  impl FakeApi {
    fn with_queues(queues: Vec<Queue>) -> Self {
      Self {
        queues: Mutex::new(queues),
        ..Self::default()
      }
    }
  }

  #[async_trait]
  impl QueueApi for FakeApi {
    async fn list_queues(&self) -> SyncResult<Vec<Queue>> {
      self.list_queue_calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.queues.lock().unwrap().clone())
    }

    async fn get_queue(&self, id: u64) -> SyncResult<Queue> {
      self.get_queue_calls.fetch_add(1, Ordering::SeqCst);
      self
        .queues
        .lock()
        .unwrap()
        .iter()
        .find(|q| q.id == id)
        .cloned()
        .ok_or(SyncError::Status {
          code: 404,
          message: "Queue not found".into(),
        })
    }

    async fn create_queue(&self, request: &CreateQueueRequest) -> SyncResult<Queue> {
      self.write_calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_writes {
        return Err(SyncError::Status {
          code: 500,
          message: "Failed to create queue".into(),
        });
      }
      let mut queues = self.queues.lock().unwrap();
      let created = queue(queues.len() as u64 + 1, &request.name);
      queues.push(created.clone());
      Ok(created)
    }

    async fn delete_queue(&self, id: u64) -> SyncResult<()> {
      self.write_calls.fetch_add(1, Ordering::SeqCst);
      self.queues.lock().unwrap().retain(|q| q.id != id);
      Ok(())
    }

    async fn list_messages(&self, filter: MessageFilter) -> SyncResult<Vec<Message>> {
      self.list_message_calls.fetch_add(1, Ordering::SeqCst);
      let messages = self.messages.lock().unwrap();
      let matching = messages
        .iter()
        .filter(|m| filter.queue_id.map_or(true, |id| m.queue_id == id))
        .take(filter.limit.map_or(usize::MAX, |l| l as usize))
        .cloned()
        .collect();
      Ok(matching)
    }

    async fn create_message(&self, request: &CreateMessageRequest) -> SyncResult<Message> {
      self.write_calls.fetch_add(1, Ordering::SeqCst);
      let mut messages = self.messages.lock().unwrap();
      let message = Message {
        id: messages.len() as u64 + 1,
        queue_id: request.queue_id,
        queue: None,
        payload: request.payload.clone(),
        priority: request.priority.unwrap_or(0),
        status: MessageStatus::Pending,
        scheduled_at: request.scheduled_at,
        processed_at: None,
        failed_at: None,
        retry_count: 0,
        max_retries: request.max_retries.unwrap_or(3),
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
      };
      messages.push(message.clone());
      Ok(message)
    }

    async fn list_workers(&self, queue_id: Option<u64>) -> SyncResult<Vec<Worker>> {
      Ok(vec![Worker {
        id: 1,
        name: "worker-1".into(),
        queue_id: queue_id.unwrap_or(1),
        queue: None,
        status: WorkerStatus::Busy,
        last_ping: Utc::now(),
        processed_count: 10,
        failed_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
      }])
    }
  }

  fn client(api: Arc<FakeApi>) -> CachedQueueClient {
    CachedQueueClient::new(api, CacheConfig::default())
  }

  #[tokio::test(start_paused = true)]
  async fn test_queue_detail_scenario() {
    let api = Arc::new(FakeApi::with_queues(vec![queue(7, "orders")]));
    let client = client(api.clone());

    let first = client.queue(7).await.unwrap();
    assert_eq!(first.name, "orders");
    let second = client.queue(7).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(api.get_queue_calls.load(Ordering::SeqCst), 1);

    client.delete_queue(7).await.unwrap();
    let snapshot = client
      .cache()
      .snapshot(&ResourceKey::queue(7).unwrap())
      .unwrap();
    assert!(snapshot.is_stale);

    let gone = client.queue(7).await;
    assert_eq!(gone.unwrap_err().status_code(), Some(404));
    // one extra attempt by the default retry policy
    assert_eq!(api.get_queue_calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_queue_refreshes_list() {
    let api = Arc::new(FakeApi::with_queues(vec![queue(1, "orders")]));
    let client = client(api.clone());

    assert_eq!(client.queues().await.unwrap().len(), 1);
    assert_eq!(client.queues().await.unwrap().len(), 1);
    assert_eq!(api.list_queue_calls.load(Ordering::SeqCst), 1);

    client
      .create_queue(CreateQueueRequest {
        name: "payments".into(),
        description: String::new(),
        queue_type: "priority".into(),
        config: String::new(),
      })
      .await
      .unwrap();

    let queues = client.queues().await.unwrap();
    assert_eq!(queues.len(), 2);
    assert_eq!(api.list_queue_calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_message_invalidates_every_message_list() {
    let api = Arc::new(FakeApi::default());
    let client = client(api.clone());

    client.messages(Some(7), Some(50)).await.unwrap();
    client.messages(None, None).await.unwrap();
    assert_eq!(api.list_message_calls.load(Ordering::SeqCst), 2);

    client
      .create_message(CreateMessageRequest {
        queue_id: 9,
        payload: "hello".into(),
        priority: None,
        scheduled_at: None,
        max_retries: None,
      })
      .await
      .unwrap();

    for key in [
      ResourceKey::messages(Some(7), Some(50)).unwrap(),
      ResourceKey::messages(None, None).unwrap(),
    ] {
      assert!(client.cache().snapshot(&key).unwrap().is_stale);
    }

    let all = client.messages(None, None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(api.list_message_calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalid_writes_never_reach_the_api() {
    let api = Arc::new(FakeApi::default());
    let client = client(api.clone());

    let result = client
      .create_queue(CreateQueueRequest {
        name: String::new(),
        description: String::new(),
        queue_type: "fifo".into(),
        config: String::new(),
      })
      .await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert!(client.delete_queue(0).await.is_err());
    assert!(client.messages(Some(0), None).await.is_err());
    assert_eq!(api.write_calls.load(Ordering::SeqCst), 0);
    assert!(client.cache().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_write_keeps_cache_fresh() {
    let api = Arc::new(FakeApi {
      fail_writes: true,
      ..FakeApi::with_queues(vec![queue(1, "orders")])
    });
    let client = client(api.clone());
    client.queues().await.unwrap();

    let result = client
      .create_queue(CreateQueueRequest {
        name: "payments".into(),
        description: String::new(),
        queue_type: "fifo".into(),
        config: String::new(),
      })
      .await;
    assert_eq!(result.unwrap_err().status_code(), Some(500));
    assert_eq!(api.write_calls.load(Ordering::SeqCst), 1);

    let snapshot = client.cache().snapshot(&ResourceKey::queue_list()).unwrap();
    assert_eq!(snapshot.status, EntryStatus::Success);
    assert!(!snapshot.is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_observer_follows_writes() {
    let api = Arc::new(FakeApi::with_queues(vec![queue(1, "orders")]));
    let client = client(api.clone());

    let mut observer = client.observe(ResourceKey::queue_list());
    observer.fetch();
    tokio::time::sleep(Duration::from_millis(1)).await;
    observer.poll();
    assert_eq!(observer.data().and_then(Resource::as_queues).map(<[Queue]>::len), Some(1));

    client
      .create_queue(CreateQueueRequest {
        name: "payments".into(),
        description: String::new(),
        queue_type: "fifo".into(),
        config: String::new(),
      })
      .await
      .unwrap();

    assert!(observer.poll());
    tokio::time::sleep(Duration::from_millis(1)).await;
    observer.poll();
    assert_eq!(observer.data().and_then(Resource::as_queues).map(<[Queue]>::len), Some(2));
  }
}
