use std::time::Duration;
use tokio::sync::mpsc;

use crate::key::ResourceKey;

/// Watch loop events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Periodic tick for query polling
  Tick,
  /// A write made this key stale
  Invalidated(ResourceKey),
  /// Ctrl-C
  Shutdown,
}

/// Event handler that produces events from a tick timer, Ctrl-C, and the
/// invalidation bus
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let ticks = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      loop {
        interval.tick().await;
        if ticks.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    let shutdown = tx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = shutdown.send(Event::Shutdown);
      }
    });

    Self { tx, rx }
  }

  /// Sender for pushing events from elsewhere, e.g. bus callbacks
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
