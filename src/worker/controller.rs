//! The cache controller: lifecycle handling and per-request routing.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::cache::{CachedResponse, GenerationStore};
use crate::fetch::{Fetcher, Request, Response};

use super::policy::{classify, RequestClass};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Initial state, nothing installed yet
  Parsed,
  /// Install in progress (precaching the manifest)
  Installing,
  /// Manifest cached; immediately eligible for activation (skip waiting)
  Installed,
  /// Activation in progress (purging stale generations)
  Activating,
  /// Controlling pages; routing applies to every request
  Activated,
  /// Install failed, worker is discarded
  Redundant,
}

impl WorkerState {
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Activated)
  }
}

/// Installation-time constants for one worker version.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Version tag, doubling as the current generation name
  pub version: String,
  /// Critical resources precached at install (app shell root, offline
  /// fallback page, built stylesheet, built script bundle)
  pub precache: Vec<String>,
  /// The fallback document served to failed navigations
  pub offline_fallback: String,
  /// Substring identifying the domain-data endpoint
  pub data_endpoint: String,
}

/// Which branch of the routing policy produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Cached entry served because the network failed
  Cache,
  /// Offline fallback document, or the synthesized stale-data response
  Fallback,
}

/// A detached cache write racing the response return.
///
/// The write is already running when `route_request` returns; awaiting the
/// task only observes its completion. Dropping it does not cancel the
/// write.
pub struct WriteTask(tokio::task::JoinHandle<()>);

impl WriteTask {
  /// Wait for the background write to finish. Tests use this to observe
  /// the store afterwards; production callers normally ignore the task.
  pub async fn finish(self) {
    let _ = self.0.await;
  }
}

/// The routed response plus its detached side effect, if any.
pub struct Routed {
  pub response: Response,
  pub source: ResponseSource,
  pub write: Option<WriteTask>,
}

/// Cache controller generic over an injected generation store.
pub struct CacheController<S: GenerationStore + 'static> {
  store: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  config: WorkerConfig,
  state: Mutex<WorkerState>,
}

impl<S: GenerationStore + 'static> CacheController<S> {
  pub fn new(store: S, fetcher: Arc<dyn Fetcher>, config: WorkerConfig) -> Self {
    Self {
      store: Arc::new(store),
      fetcher,
      config,
      state: Mutex::new(WorkerState::Parsed),
    }
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Redundant)
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  fn set_state(&self, state: WorkerState) {
    if let Ok(mut current) = self.state.lock() {
      *current = state;
    }
  }

  /// Install: atomically precache the manifest into a fresh generation.
  ///
  /// Every manifest entry is fetched before anything is written, so a
  /// single unreachable resource leaves the generation entirely absent.
  /// Success signals immediate activation eligibility - no waiting for
  /// other contexts to release the previous version.
  pub async fn on_install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing);

    let fetches = self
      .config
      .precache
      .iter()
      .map(|url| self.fetcher.fetch(Request::get(url.clone())));

    let responses = match try_join_all(fetches).await {
      Ok(responses) => responses,
      Err(err) => {
        self.set_state(WorkerState::Redundant);
        return Err(eyre!("Install failed, manifest resource unreachable: {}", err));
      }
    };

    self.store.ensure(&self.config.version)?;
    for (url, response) in self.config.precache.iter().zip(responses) {
      let request = Request::get(url.clone());
      let entry = CachedResponse::from_response(&response);
      if let Err(err) = self.store.put(&self.config.version, &request.cache_key(), url, &entry) {
        // No partial installs: drop whatever landed before the failure
        let _ = self.store.remove(&self.config.version);
        self.set_state(WorkerState::Redundant);
        return Err(err);
      }
    }

    self.set_state(WorkerState::Installed);
    debug!(
      "Installed generation {} ({} resources)",
      self.config.version,
      self.config.precache.len()
    );
    Ok(())
  }

  /// Activate: purge every stale generation, then claim open pages so the
  /// routing policy applies from the very next request.
  pub async fn on_activate(&self) -> Result<()> {
    self.set_state(WorkerState::Activating);

    self.store.ensure(&self.config.version)?;
    for name in self.store.names()? {
      if name != self.config.version {
        self.store.remove(&name)?;
        debug!("Purged stale generation {}", name);
      }
    }

    self.set_state(WorkerState::Activated);
    Ok(())
  }

  /// Route one intercepted request through the policy table.
  pub async fn route_request(&self, req: Request) -> Result<Routed> {
    match classify(&req, &self.config.data_endpoint) {
      RequestClass::Navigation => self.route_navigation(req).await,
      RequestClass::DomainData => self.route_domain_data(req).await,
      RequestClass::Default => self.route_default(req).await,
    }
  }

  /// Navigation: network first; failed navigations get the cached offline
  /// fallback document. A fallback miss propagates as a failed navigation.
  async fn route_navigation(&self, req: Request) -> Result<Routed> {
    match self.fetcher.fetch(req).await {
      Ok(response) => Ok(Routed {
        response,
        source: ResponseSource::Network,
        write: None,
      }),
      Err(err) => {
        let fallback_key = Request::get(self.config.offline_fallback.clone()).cache_key();
        match self.store.get_any(&fallback_key)? {
          Some(entry) => {
            debug!("Serving offline fallback page");
            Ok(Routed {
              response: entry.into_response(),
              source: ResponseSource::Fallback,
              write: None,
            })
          }
          None => Err(err),
        }
      }
    }
  }

  /// Domain data: network first with write-through regardless of status;
  /// on network failure, any cached match, else a synthesized stale-data
  /// response rather than nothing.
  async fn route_domain_data(&self, req: Request) -> Result<Routed> {
    let key = req.cache_key();
    let url = req.url.clone();

    match self.fetcher.fetch(req).await {
      Ok(response) => {
        let write = self.spawn_write(key, url, response.clone());
        Ok(Routed {
          response,
          source: ResponseSource::Network,
          write: Some(write),
        })
      }
      Err(_) => match self.store.get_any(&key)? {
        Some(entry) => Ok(Routed {
          response: entry.into_response(),
          source: ResponseSource::Cache,
          write: None,
        }),
        None => Ok(Routed {
          response: stale_data_unavailable(),
          source: ResponseSource::Fallback,
          write: None,
        }),
      },
    }
  }

  /// Default: network first with write-through only on status 200; on
  /// network failure, any cached match, else the failure propagates.
  async fn route_default(&self, req: Request) -> Result<Routed> {
    let key = req.cache_key();
    let url = req.url.clone();

    match self.fetcher.fetch(req).await {
      Ok(response) => {
        let write = response
          .is_ok()
          .then(|| self.spawn_write(key, url, response.clone()));
        Ok(Routed {
          response,
          source: ResponseSource::Network,
          write,
        })
      }
      Err(err) => match self.store.get_any(&key)? {
        Some(entry) => Ok(Routed {
          response: entry.into_response(),
          source: ResponseSource::Cache,
          write: None,
        }),
        None => Err(err),
      },
    }
  }

  /// Spawn the store-then-serve write. The caller gets the live response
  /// immediately; a failed write is logged and swallowed, never surfaced.
  fn spawn_write(&self, key: String, url: String, response: Response) -> WriteTask {
    let store = Arc::clone(&self.store);
    let generation = self.config.version.clone();

    WriteTask(tokio::spawn(async move {
      let entry = CachedResponse::from_response(&response);
      if let Err(err) = store.put(&generation, &key, &url, &entry) {
        debug!("Cache write for {} failed: {}", url, err);
      }
    }))
  }
}

/// Synthesized response for a domain-data request that failed with no
/// cached copy available.
fn stale_data_unavailable() -> Response {
  Response::json(
    503,
    &serde_json::json!({
      "error": "offline",
      "detail": "no cached copy of this request"
    }),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStore;
  use crate::fetch::BoxFuture;

  /// Fetcher built from a closure, the harness side of the network seam.
  struct FnFetcher<F>(F);

  impl<F> Fetcher for FnFetcher<F>
  where
    F: Fn(&Request) -> Result<Response> + Send + Sync,
  {
    fn fetch(&self, req: Request) -> BoxFuture<Response> {
      let out = (self.0)(&req);
      Box::pin(async move { out })
    }
  }

  fn fetcher<F>(f: F) -> Arc<dyn Fetcher>
  where
    F: Fn(&Request) -> Result<Response> + Send + Sync + 'static,
  {
    Arc::new(FnFetcher(f))
  }

  fn offline() -> Arc<dyn Fetcher> {
    fetcher(|req| Err(eyre!("network unreachable: {}", req.url)))
  }

  fn config() -> WorkerConfig {
    WorkerConfig {
      version: "resqhub-v2".to_string(),
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/build/assets/app.css".to_string(),
        "/build/assets/app.js".to_string(),
      ],
      offline_fallback: "/offline.html".to_string(),
      data_endpoint: "/api/earthquakes".to_string(),
    }
  }

  fn controller(fetch: Arc<dyn Fetcher>) -> CacheController<MemoryStore> {
    CacheController::new(MemoryStore::new(), fetch, config())
  }

  #[tokio::test]
  async fn install_precaches_whole_manifest() {
    let ctl = controller(fetcher(|req| {
      Ok(Response::new(200).with_body(format!("body of {}", req.url)))
    }));

    ctl.on_install().await.unwrap();

    assert_eq!(ctl.state(), WorkerState::Installed);
    for url in &config().precache {
      let key = Request::get(url.clone()).cache_key();
      let entry = ctl.store.get("resqhub-v2", &key).unwrap().unwrap();
      assert_eq!(entry.body, format!("body of {}", url).into_bytes());
    }
  }

  #[tokio::test]
  async fn install_is_all_or_nothing() {
    let ctl = controller(fetcher(|req| {
      if req.url == "/build/assets/app.js" {
        Err(eyre!("unreachable"))
      } else {
        Ok(Response::new(200))
      }
    }));

    assert!(ctl.on_install().await.is_err());

    // The generation for this version holds none of the manifest entries
    assert_eq!(ctl.state(), WorkerState::Redundant);
    assert!(ctl.store.names().unwrap().is_empty());
    assert_eq!(ctl.store.len("resqhub-v2").unwrap(), 0);
  }

  #[tokio::test]
  async fn activate_leaves_exactly_the_current_generation() {
    let ctl = controller(fetcher(|_| Ok(Response::new(200))));
    ctl.store.ensure("resqhub-v1").unwrap();
    ctl.store.ensure("resqhub-v0").unwrap();

    ctl.on_install().await.unwrap();
    ctl.on_activate().await.unwrap();

    assert_eq!(ctl.store.names().unwrap(), vec!["resqhub-v2".to_string()]);
    assert!(ctl.state().can_intercept_fetch());
  }

  #[tokio::test]
  async fn navigation_falls_back_to_offline_page() {
    let online = controller(fetcher(|req| {
      Ok(Response::new(200).with_body(if req.url == "/offline.html" {
        "you are offline"
      } else {
        "live page"
      }))
    }));
    online.on_install().await.unwrap();

    // Same store, network gone
    let ctl = CacheController {
      store: Arc::clone(&online.store),
      fetcher: offline(),
      config: config(),
      state: Mutex::new(WorkerState::Activated),
    };

    let routed = ctl.route_request(Request::navigate("/dashboard")).await.unwrap();
    assert_eq!(routed.source, ResponseSource::Fallback);
    assert_eq!(routed.response.body, b"you are offline");
  }

  #[tokio::test]
  async fn navigation_fallback_miss_propagates_failure() {
    let ctl = controller(offline());

    let result = ctl.route_request(Request::navigate("/dashboard")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn domain_data_serves_network_and_writes_through() {
    let ctl = controller(fetcher(|_| {
      Ok(Response::new(200).with_body(r#"[{"magnitude":6.1}]"#))
    }));

    let req = Request::get("/api/earthquakes?limit=10");
    let key = req.cache_key();
    let routed = ctl.route_request(req).await.unwrap();

    // Caller gets the live body
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body, br#"[{"magnitude":6.1}]"#);

    // The detached write lands in the current generation
    routed.write.unwrap().finish().await;
    let entry = ctl.store.get("resqhub-v2", &key).unwrap().unwrap();
    assert_eq!(entry.body, br#"[{"magnitude":6.1}]"#);
  }

  #[tokio::test]
  async fn domain_data_writes_through_non_200_responses() {
    let ctl = controller(fetcher(|_| Ok(Response::new(500).with_body("oops"))));

    let req = Request::get("/api/earthquakes");
    let key = req.cache_key();
    let routed = ctl.route_request(req).await.unwrap();

    routed.write.unwrap().finish().await;
    assert_eq!(ctl.store.get("resqhub-v2", &key).unwrap().unwrap().status, 500);
  }

  #[tokio::test]
  async fn domain_data_falls_back_to_any_generation() {
    let ctl = controller(offline());
    let req = Request::get("/api/earthquakes");
    let entry = CachedResponse::from_response(&Response::new(200).with_body("stale quakes"));
    ctl
      .store
      .put("resqhub-v1", &req.cache_key(), &req.url, &entry)
      .unwrap();

    let routed = ctl.route_request(req).await.unwrap();
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.body, b"stale quakes");
  }

  #[tokio::test]
  async fn domain_data_miss_yields_stale_data_unavailable() {
    let ctl = controller(offline());

    let routed = ctl.route_request(Request::get("/api/earthquakes")).await.unwrap();
    assert_eq!(routed.source, ResponseSource::Fallback);
    assert_eq!(routed.response.status, 503);

    let body: serde_json::Value = serde_json::from_slice(&routed.response.body).unwrap();
    assert_eq!(body["error"], "offline");
  }

  #[tokio::test]
  async fn default_policy_gates_writes_on_status_200() {
    let ctl = controller(fetcher(|req| {
      Ok(if req.url == "/api/teams" {
        Response::new(404)
      } else {
        Response::new(200).with_body("asset")
      })
    }));

    // Non-200: returned to the caller but never cached
    let missed = Request::get("/api/teams");
    let routed = ctl.route_request(missed.clone()).await.unwrap();
    assert_eq!(routed.response.status, 404);
    assert!(routed.write.is_none());
    assert!(ctl.store.get_any(&missed.cache_key()).unwrap().is_none());

    // 200: cached
    let hit = Request::get("/build/assets/app.css");
    let routed = ctl.route_request(hit.clone()).await.unwrap();
    routed.write.unwrap().finish().await;
    assert!(ctl.store.get_any(&hit.cache_key()).unwrap().is_some());
  }

  #[tokio::test]
  async fn default_policy_miss_propagates_failure() {
    let ctl = controller(offline());

    let result = ctl.route_request(Request::get("/build/assets/app.css")).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn detached_write_completes_even_when_ignored() {
    let ctl = controller(fetcher(|_| Ok(Response::new(200).with_body("data"))));

    let req = Request::get("/api/earthquakes");
    let key = req.cache_key();
    let routed = ctl.route_request(req).await.unwrap();
    drop(routed.write);

    // The spawned write proceeds without being awaited
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(ctl.store.get("resqhub-v2", &key).unwrap().is_some());
  }
}
