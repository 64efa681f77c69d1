//! Offline data mirror: last-known domain collections for offline reads.
//!
//! Three independent collections (earthquakes, disasters, alerts) are
//! mirrored into durable key-value storage as opaque JSON records, exactly
//! as received from the server. Every save wholesale-replaces the stored
//! sequence - no merging, no deduplication.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::kv::KvStore;

/// The mirrored collection categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  Earthquakes,
  Disasters,
  Alerts,
}

impl Category {
  pub const ALL: [Category; 3] = [Category::Earthquakes, Category::Disasters, Category::Alerts];

  /// The logical storage key for this category.
  pub fn storage_key(self) -> &'static str {
    match self {
      Self::Earthquakes => "earthquakes",
      Self::Disasters => "disasters",
      Self::Alerts => "alerts",
    }
  }
}

/// Mirror of server-sourced collections into durable storage.
///
/// The mirror owns its three keys exclusively - the cache controller never
/// touches this data. All operations are synchronous; storage failures
/// surface as errors to the caller.
pub struct OfflineMirror<S: KvStore> {
  store: Arc<S>,
}

impl<S: KvStore> OfflineMirror<S> {
  pub fn new(store: S) -> Self {
    Self {
      store: Arc::new(store),
    }
  }

  /// Replace the stored earthquake collection.
  pub fn save_earthquakes(&self, records: &[Value]) -> Result<()> {
    self.save(Category::Earthquakes, records)
  }

  /// Replace the stored disaster collection.
  pub fn save_disasters(&self, records: &[Value]) -> Result<()> {
    self.save(Category::Disasters, records)
  }

  /// Replace the stored alert collection.
  pub fn save_alerts(&self, records: &[Value]) -> Result<()> {
    self.save(Category::Alerts, records)
  }

  pub fn get_earthquakes(&self) -> Result<Vec<Value>> {
    self.get(Category::Earthquakes)
  }

  pub fn get_disasters(&self) -> Result<Vec<Value>> {
    self.get(Category::Disasters)
  }

  pub fn get_alerts(&self) -> Result<Vec<Value>> {
    self.get(Category::Alerts)
  }

  /// Replace one category with the given ordered sequence. Records are
  /// schema-free passthrough - no shape validation.
  pub fn save(&self, category: Category, records: &[Value]) -> Result<()> {
    let payload = serde_json::to_string(records)?;
    self.store.set(category.storage_key(), &payload)
  }

  /// The most recently saved sequence, or empty if never saved.
  pub fn get(&self, category: Category) -> Result<Vec<Value>> {
    let raw = match self.store.get(category.storage_key())? {
      Some(raw) => raw,
      None => return Ok(Vec::new()),
    };

    match serde_json::from_str(&raw) {
      Ok(records) => Ok(records),
      Err(err) => {
        // Corrupt payloads read as empty rather than failing the page
        tracing::warn!("Discarding undecodable {} mirror: {}", category.storage_key(), err);
        Ok(Vec::new())
      }
    }
  }

  /// True if any category currently holds a non-empty saved sequence.
  pub fn has_offline_data(&self) -> Result<bool> {
    for category in Category::ALL {
      if !self.get(category)?.is_empty() {
        return Ok(true);
      }
    }
    Ok(false)
  }

  /// Erase all three categories.
  pub fn clear_cache(&self) -> Result<()> {
    for category in Category::ALL {
      self.store.remove(category.storage_key())?;
    }
    Ok(())
  }
}

impl<S: KvStore> Clone for OfflineMirror<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}
