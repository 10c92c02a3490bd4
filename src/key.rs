//! Structural resource keys and the prefix patterns used to invalidate them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// The kinds of remote resources the dashboard reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
  /// All queues
  QueueList,
  /// A single queue by id
  Queue,
  /// Messages, optionally filtered by queue and limited in count
  MessageList,
  /// Workers, optionally filtered by queue
  WorkerList,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::QueueList => "queue-list",
      Self::Queue => "queue",
      Self::MessageList => "message-list",
      Self::WorkerList => "worker-list",
    }
  }

  fn takes_id(self) -> bool {
    matches!(self, Self::Queue)
  }

  fn allows(self, param: &FilterParam) -> bool {
    match (self, param) {
      (Self::MessageList, FilterParam::QueueId(_) | FilterParam::Limit(_)) => true,
      (Self::WorkerList, FilterParam::QueueId(_)) => true,
      _ => false,
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A filter parameter attached to a list key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterParam {
  QueueId(u64),
  Limit(u32),
}

impl FilterParam {
  /// Canonical position within a key's parameter list
  fn rank(&self) -> u8 {
    match self {
      Self::QueueId(_) => 0,
      Self::Limit(_) => 1,
    }
  }

  fn name(&self) -> &'static str {
    match self {
      Self::QueueId(_) => "queue_id",
      Self::Limit(_) => "limit",
    }
  }
}

impl fmt::Display for FilterParam {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::QueueId(id) => write!(f, "queue_id={}", id),
      Self::Limit(limit) => write!(f, "limit={}", limit),
    }
  }
}

/// One position in a key's flattened component sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyComponent {
  Kind(ResourceKind),
  Id(u64),
  Param(FilterParam),
}

/// Address of one cacheable remote query.
///
/// Equality is structural: two keys built from the same logical request are
/// equal and hash identically. Keys are validated at construction and their
/// filter parameters are stored in canonical order, so the same request can
/// never produce two different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
  kind: ResourceKind,
  id: Option<u64>,
  params: Vec<FilterParam>,
}

impl ResourceKey {
  /// Build and validate a key.
  pub fn new(
    kind: ResourceKind,
    id: Option<u64>,
    mut params: Vec<FilterParam>,
  ) -> SyncResult<Self> {
    match (kind.takes_id(), id) {
      (true, None) => {
        return Err(SyncError::validation(format!("{} key requires an id", kind)));
      }
      (false, Some(_)) => {
        return Err(SyncError::validation(format!("{} key does not take an id", kind)));
      }
      (_, Some(0)) => return Err(SyncError::validation("resource id must be positive")),
      _ => {}
    }

    for param in &params {
      if !kind.allows(param) {
        return Err(SyncError::validation(format!(
          "{} is not a valid filter for {}",
          param.name(),
          kind
        )));
      }
      match param {
        FilterParam::QueueId(0) => return Err(SyncError::validation("queue_id must be positive")),
        FilterParam::Limit(0) => return Err(SyncError::validation("limit must be positive")),
        _ => {}
      }
    }

    params.sort_by_key(FilterParam::rank);
    if let Some(pair) = params.windows(2).find(|w| w[0].rank() == w[1].rank()) {
      return Err(SyncError::validation(format!(
        "duplicate {} filter",
        pair[0].name()
      )));
    }

    Ok(Self { kind, id, params })
  }

  pub fn queue_list() -> Self {
    Self {
      kind: ResourceKind::QueueList,
      id: None,
      params: Vec::new(),
    }
  }

  pub fn queue(id: u64) -> SyncResult<Self> {
    Self::new(ResourceKind::Queue, Some(id), Vec::new())
  }

  pub fn messages(queue_id: Option<u64>, limit: Option<u32>) -> SyncResult<Self> {
    let params = queue_id
      .map(FilterParam::QueueId)
      .into_iter()
      .chain(limit.map(FilterParam::Limit))
      .collect();
    Self::new(ResourceKind::MessageList, None, params)
  }

  pub fn workers(queue_id: Option<u64>) -> SyncResult<Self> {
    let params = queue_id.map(FilterParam::QueueId).into_iter().collect();
    Self::new(ResourceKind::WorkerList, None, params)
  }

  pub fn kind(&self) -> ResourceKind {
    self.kind
  }

  pub fn id(&self) -> Option<u64> {
    self.id
  }

  pub fn params(&self) -> &[FilterParam] {
    &self.params
  }

  /// Value of the queue-id filter, if present.
  pub fn queue_filter(&self) -> Option<u64> {
    self.params.iter().find_map(|p| match p {
      FilterParam::QueueId(id) => Some(*id),
      _ => None,
    })
  }

  /// Value of the limit filter, if present.
  pub fn limit_filter(&self) -> Option<u32> {
    self.params.iter().find_map(|p| match p {
      FilterParam::Limit(limit) => Some(*limit),
      _ => None,
    })
  }

  /// Flattened components: kind, then id, then filters in canonical order.
  pub fn components(&self) -> Vec<KeyComponent> {
    std::iter::once(KeyComponent::Kind(self.kind))
      .chain(self.id.map(KeyComponent::Id))
      .chain(self.params.iter().copied().map(KeyComponent::Param))
      .collect()
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.kind)?;
    if let Some(id) = self.id {
      write!(f, "/{}", id)?;
    }
    for (i, param) in self.params.iter().enumerate() {
      let sep = if i == 0 { '?' } else { '&' };
      write!(f, "{}{}", sep, param)?;
    }
    Ok(())
  }
}

/// A key prefix used to select keys for invalidation.
///
/// Trailing components left out of the pattern match any value, so the
/// pattern for a kind matches every key of that kind regardless of id or
/// filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
  components: Vec<KeyComponent>,
}

impl KeyPattern {
  /// Every key of the given kind.
  pub fn kind(kind: ResourceKind) -> Self {
    Self {
      components: vec![KeyComponent::Kind(kind)],
    }
  }

  /// The given key and any key extending it with further components.
  pub fn prefix(key: &ResourceKey) -> Self {
    Self {
      components: key.components(),
    }
  }

  pub fn components(&self) -> &[KeyComponent] {
    &self.components
  }

  pub fn matches(&self, key: &ResourceKey) -> bool {
    let key_components = key.components();
    self.components.len() <= key_components.len()
      && self
        .components
        .iter()
        .zip(key_components.iter())
        .all(|(p, k)| p == k)
  }
}

impl From<&ResourceKey> for KeyPattern {
  fn from(key: &ResourceKey) -> Self {
    Self::prefix(key)
  }
}

impl From<ResourceKind> for KeyPattern {
  fn from(kind: ResourceKind) -> Self {
    Self::kind(kind)
  }
}

impl fmt::Display for KeyPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self
      .components
      .iter()
      .map(|c| match c {
        KeyComponent::Kind(kind) => kind.to_string(),
        KeyComponent::Id(id) => id.to_string(),
        KeyComponent::Param(param) => param.to_string(),
      })
      .collect();
    write!(f, "{}/*", parts.join("/"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_structural_equality() {
    let a = ResourceKey::messages(Some(7), Some(50)).unwrap();
    let b = ResourceKey::new(
      ResourceKind::MessageList,
      None,
      vec![FilterParam::Limit(50), FilterParam::QueueId(7)],
    )
    .unwrap();
    assert_eq!(a, b);
    assert_ne!(a, ResourceKey::messages(Some(7), None).unwrap());
    assert_ne!(
      ResourceKey::queue(7).unwrap(),
      ResourceKey::queue(8).unwrap()
    );
  }

  #[test]
  fn test_malformed_keys_fail_fast() {
    assert!(matches!(
      ResourceKey::queue(0),
      Err(SyncError::Validation(_))
    ));
    assert!(ResourceKey::new(ResourceKind::Queue, None, vec![]).is_err());
    assert!(ResourceKey::new(ResourceKind::QueueList, Some(3), vec![]).is_err());
    assert!(ResourceKey::messages(Some(1), Some(0)).is_err());
    assert!(ResourceKey::new(
      ResourceKind::WorkerList,
      None,
      vec![FilterParam::Limit(10)]
    )
    .is_err());
    assert!(ResourceKey::new(
      ResourceKind::MessageList,
      None,
      vec![FilterParam::QueueId(1), FilterParam::QueueId(2)]
    )
    .is_err());
  }

  #[test]
  fn test_kind_pattern_matches_all_filters() {
    let pattern = KeyPattern::kind(ResourceKind::MessageList);
    assert!(pattern.matches(&ResourceKey::messages(None, None).unwrap()));
    assert!(pattern.matches(&ResourceKey::messages(Some(7), Some(50)).unwrap()));
    assert!(pattern.matches(&ResourceKey::messages(None, Some(10)).unwrap()));
    assert!(!pattern.matches(&ResourceKey::workers(Some(7)).unwrap()));
    assert!(!pattern.matches(&ResourceKey::queue_list()));
  }

  #[test]
  fn test_prefix_pattern() {
    let queue7 = ResourceKey::messages(Some(7), None).unwrap();
    let pattern = KeyPattern::prefix(&queue7);
    assert!(pattern.matches(&queue7));
    assert!(pattern.matches(&ResourceKey::messages(Some(7), Some(50)).unwrap()));
    assert!(!pattern.matches(&ResourceKey::messages(Some(8), Some(50)).unwrap()));
    assert!(!pattern.matches(&ResourceKey::messages(None, Some(50)).unwrap()));
    assert!(!pattern.matches(&ResourceKey::messages(None, None).unwrap()));
  }

  #[test]
  fn test_exact_queue_pattern() {
    let pattern = KeyPattern::from(&ResourceKey::queue(7).unwrap());
    assert!(pattern.matches(&ResourceKey::queue(7).unwrap()));
    assert!(!pattern.matches(&ResourceKey::queue(70).unwrap()));
    assert!(!pattern.matches(&ResourceKey::queue_list()));
  }

  #[test]
  fn test_display() {
    assert_eq!(ResourceKey::queue_list().to_string(), "queue-list");
    assert_eq!(ResourceKey::queue(7).unwrap().to_string(), "queue/7");
    assert_eq!(
      ResourceKey::messages(Some(7), Some(50))
        .unwrap()
        .to_string(),
      "message-list?queue_id=7&limit=50"
    );
    assert_eq!(
      KeyPattern::kind(ResourceKind::MessageList).to_string(),
      "message-list/*"
    );
  }
}
