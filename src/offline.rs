//! Page-level offline hook: connectivity flags plus mirror coordination.
//!
//! The hook exposes the whole surface other UI collaborators may depend on:
//! `is_online`, `has_offline_data`, `save_offline_data`, `load_offline_data`
//! and `clear_offline_cache`. Connectivity arrives as events from a
//! `ConnectivityWatcher`; call `poll()` from the host's tick loop to drain
//! them.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::event::{ConnectivityEvent, ConnectivityWatcher, ListenerId};
use crate::kv::KvStore;
use crate::mirror::OfflineMirror;

/// Input to `save_offline_data` - only the categories present are saved.
#[derive(Debug, Clone, Default)]
pub struct OfflinePayload {
  pub earthquakes: Option<Vec<Value>>,
  pub disasters: Option<Vec<Value>>,
  pub alerts: Option<Vec<Value>>,
}

/// Snapshot of all three mirrored collections.
#[derive(Debug, Clone, Default)]
pub struct OfflineData {
  pub earthquakes: Vec<Value>,
  pub disasters: Vec<Value>,
  pub alerts: Vec<Value>,
}

/// Offline coordinator with two observable flags.
///
/// `is_online` is seeded from the watcher at mount time and afterwards
/// driven only by Online/Offline events. `has_offline_data` is seeded from
/// the mirror and updated by the save/clear operations.
pub struct OfflineHook<S: KvStore> {
  mirror: OfflineMirror<S>,
  watcher: Arc<ConnectivityWatcher>,
  is_online: bool,
  has_offline_data: bool,
  listener: Option<(ListenerId, mpsc::UnboundedReceiver<ConnectivityEvent>)>,
}

impl<S: KvStore> OfflineHook<S> {
  /// Mount the hook: seed both flags and register the connectivity
  /// listener.
  pub fn mount(mirror: OfflineMirror<S>, watcher: Arc<ConnectivityWatcher>) -> Result<Self> {
    let listener = watcher.subscribe();

    Ok(Self {
      is_online: watcher.is_online(),
      has_offline_data: mirror.has_offline_data()?,
      mirror,
      watcher,
      listener: Some(listener),
    })
  }

  pub fn is_online(&self) -> bool {
    self.is_online
  }

  pub fn has_offline_data(&self) -> bool {
    self.has_offline_data
  }

  /// Drain pending connectivity events.
  ///
  /// Returns `true` if `is_online` changed. Call this from the host's tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.listener {
      Some((_, rx)) => rx,
      None => return false,
    };

    let before = self.is_online;
    while let Ok(event) = receiver.try_recv() {
      self.is_online = match event {
        ConnectivityEvent::Online => true,
        ConnectivityEvent::Offline => false,
      };
    }

    self.is_online != before
  }

  /// Persist whichever categories are present in the payload.
  pub fn save_offline_data(&mut self, payload: &OfflinePayload) -> Result<()> {
    if let Some(records) = &payload.earthquakes {
      self.mirror.save_earthquakes(records)?;
    }
    if let Some(records) = &payload.disasters {
      self.mirror.save_disasters(records)?;
    }
    if let Some(records) = &payload.alerts {
      self.mirror.save_alerts(records)?;
    }

    self.has_offline_data = self.mirror.has_offline_data()?;
    Ok(())
  }

  /// Pure read of all three categories - no side effects.
  pub fn load_offline_data(&self) -> Result<OfflineData> {
    Ok(OfflineData {
      earthquakes: self.mirror.get_earthquakes()?,
      disasters: self.mirror.get_disasters()?,
      alerts: self.mirror.get_alerts()?,
    })
  }

  /// Erase the mirror and reset the flag.
  pub fn clear_offline_cache(&mut self) -> Result<()> {
    self.mirror.clear_cache()?;
    self.has_offline_data = false;
    Ok(())
  }

  /// Deregister the connectivity listener. Idempotent; also runs on drop,
  /// so repeated mounts never leak listeners.
  pub fn unmount(&mut self) {
    if let Some((id, _rx)) = self.listener.take() {
      self.watcher.unsubscribe(id);
    }
  }
}

impl<S: KvStore> Drop for OfflineHook<S> {
  fn drop(&mut self) {
    self.unmount();
  }
}
