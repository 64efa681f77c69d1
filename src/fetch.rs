//! Request/response model and the network fetch seam.
//!
//! A rejected transfer (offline, DNS failure, refused connection) surfaces
//! as an `Err`. A response with a non-200 status is a successful fetch and
//! surfaces as `Ok` - callers that care about the status check it themselves.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use url::Url;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Delete,
  Patch,
  Head,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
      Self::Patch => "PATCH",
      Self::Head => "HEAD",
    }
  }
}

/// Request mode. `Navigate` marks a full-document load; everything else is
/// a subresource fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  Navigate,
  SameOrigin,
  #[default]
  NoCors,
  Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub url: String,
  pub method: Method,
  pub mode: RequestMode,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  /// A plain GET subresource request.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: Method::Get,
      mode: RequestMode::NoCors,
      headers: BTreeMap::new(),
    }
  }

  /// A full-document navigation request.
  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Normalized request identity: method + URL, matched exactly.
  ///
  /// SHA256 hash for stable, fixed-length keys.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A response snapshot. Cloneable - the body is fully buffered.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: Vec::new(),
    }
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Build a JSON response with the matching content type.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    Self {
      status,
      headers,
      body: value.to_string().into_bytes(),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.status == 200
  }
}

/// A boxed future returning a fetch result
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Network seam for the cache controller.
///
/// Implementations must not apply any caching of their own - the controller
/// owns the caching policy.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, req: Request) -> BoxFuture<Response>;
}

/// Fetcher backed by reqwest, resolving relative URLs against a base.
pub struct HttpFetcher {
  client: reqwest::Client,
  base: Url,
}

impl HttpFetcher {
  pub fn new(base_url: &str) -> Result<Self> {
    let base =
      Url::parse(base_url).map_err(|e| eyre!("Invalid server base URL {}: {}", base_url, e))?;
    Ok(Self {
      client: reqwest::Client::new(),
      base,
    })
  }

  fn resolve(&self, raw: &str) -> Result<Url> {
    // Absolute URLs pass through, everything else joins the base
    match Url::parse(raw) {
      Ok(url) => Ok(url),
      Err(_) => self
        .base
        .join(raw)
        .map_err(|e| eyre!("Cannot resolve request URL {}: {}", raw, e)),
    }
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(&self, req: Request) -> BoxFuture<Response> {
    let client = self.client.clone();
    let url = self.resolve(&req.url);

    Box::pin(async move {
      let url = url?;
      let method = reqwest::Method::from_bytes(req.method.as_str().as_bytes())
        .map_err(|e| eyre!("Invalid method: {}", e))?;

      let mut builder = client.request(method, url.clone());
      for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Fetch failed for {}: {}", url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    })
  }
}
