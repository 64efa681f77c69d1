use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Connectivity transition events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  /// The browser reported a "became online" transition
  Online,
  /// The browser reported a "became offline" transition
  Offline,
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Connectivity signal source shared between the offline hook and whatever
/// drives it (a platform integration, or a test harness calling
/// `set_online` directly).
pub struct ConnectivityWatcher {
  online: AtomicBool,
  listeners: Mutex<HashMap<u64, mpsc::UnboundedSender<ConnectivityEvent>>>,
  next_id: AtomicU64,
}

impl ConnectivityWatcher {
  pub fn new(initially_online: bool) -> Self {
    Self {
      online: AtomicBool::new(initially_online),
      listeners: Mutex::new(HashMap::new()),
      next_id: AtomicU64::new(1),
    }
  }

  /// Current connectivity snapshot.
  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Register a listener for connectivity transitions.
  pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ConnectivityEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);

    if let Ok(mut listeners) = self.listeners.lock() {
      listeners.insert(id, tx);
    }

    (ListenerId(id), rx)
  }

  /// Deregister a listener. Safe to call with an already-removed id.
  pub fn unsubscribe(&self, id: ListenerId) {
    if let Ok(mut listeners) = self.listeners.lock() {
      listeners.remove(&id.0);
    }
  }

  /// Number of registered listeners (used to verify teardown).
  pub fn listener_count(&self) -> usize {
    self.listeners.lock().map(|l| l.len()).unwrap_or(0)
  }

  /// Record a connectivity transition and broadcast it to every listener.
  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);

    let event = if online {
      ConnectivityEvent::Online
    } else {
      ConnectivityEvent::Offline
    };

    if let Ok(mut listeners) = self.listeners.lock() {
      // Drop listeners whose receiving side has gone away
      listeners.retain(|_, tx| tx.send(event).is_ok());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn broadcasts_transitions_to_listeners() {
    let watcher = ConnectivityWatcher::new(true);
    let (_id, mut rx) = watcher.subscribe();

    watcher.set_online(false);
    watcher.set_online(true);

    assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Offline);
    assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::Online);
    assert!(watcher.is_online());
  }

  #[test]
  fn unsubscribe_removes_listener() {
    let watcher = ConnectivityWatcher::new(true);
    let (id, mut rx) = watcher.subscribe();
    assert_eq!(watcher.listener_count(), 1);

    watcher.unsubscribe(id);
    assert_eq!(watcher.listener_count(), 0);

    watcher.set_online(false);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn dropped_receivers_are_pruned_on_send() {
    let watcher = ConnectivityWatcher::new(false);
    let (_id, rx) = watcher.subscribe();
    drop(rx);

    watcher.set_online(true);
    assert_eq!(watcher.listener_count(), 0);
  }
}
