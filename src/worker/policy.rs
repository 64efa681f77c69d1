//! Request classification for the routing policy.

use crate::fetch::Request;

/// The three routing policies, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Full-document navigation: network first, offline fallback page on
  /// failure.
  Navigation,
  /// Domain-data API call: network first, write-through regardless of
  /// status, any cached match on failure.
  DomainData,
  /// Everything else: network first, write-through only on status 200,
  /// any cached match on failure.
  Default,
}

/// Classify a request into exactly one policy, first match wins.
///
/// The domain-data test is a substring match against the full request URL.
/// That can over-match unrelated endpoints sharing the substring; the
/// pattern comes from configuration so deployments can tighten it.
pub fn classify(req: &Request, data_endpoint: &str) -> RequestClass {
  if req.is_navigation() {
    return RequestClass::Navigation;
  }

  if !data_endpoint.is_empty() && req.url.contains(data_endpoint) {
    return RequestClass::DomainData;
  }

  RequestClass::Default
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::Request;

  const ENDPOINT: &str = "/api/earthquakes";

  #[test]
  fn navigation_wins_over_endpoint_match() {
    let req = Request::navigate("/api/earthquakes/latest");
    assert_eq!(classify(&req, ENDPOINT), RequestClass::Navigation);
  }

  #[test]
  fn endpoint_substring_matches_anywhere_in_url() {
    assert_eq!(
      classify(&Request::get("/api/earthquakes?limit=50"), ENDPOINT),
      RequestClass::DomainData
    );
    assert_eq!(
      classify(
        &Request::get("https://resqhub.example/api/earthquakes"),
        ENDPOINT
      ),
      RequestClass::DomainData
    );
  }

  #[test]
  fn everything_else_is_default() {
    assert_eq!(
      classify(&Request::get("/build/assets/app.css"), ENDPOINT),
      RequestClass::Default
    );
    assert_eq!(
      classify(&Request::get("/api/alerts"), ENDPOINT),
      RequestClass::Default
    );
  }

  #[test]
  fn empty_pattern_never_matches() {
    assert_eq!(
      classify(&Request::get("/api/earthquakes"), ""),
      RequestClass::Default
    );
  }
}
