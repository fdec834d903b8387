//! Request data seen by routing and handlers.
//!
//! - `RequestContext`: the request head plus the already collected body
//! - `PathParams`: variables captured from host, path and query patterns

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri, Version, header};

/// One request, with its body collected up front.
///
/// Handlers never stream the request body, so the server reads it (up to a
/// size limit) before dispatching.
#[derive(Debug)]
pub struct RequestContext {
    parts: Parts,
    body: Bytes,
}

impl RequestContext {
    pub fn new(parts: Parts, body: Bytes) -> Self {
        Self { parts, body }
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// `host[:port]` from an absolute request target, else from the `Host`
    /// header, else empty.
    pub fn host(&self) -> &str {
        if let Some(authority) = self.parts.uri.authority() {
            return authority.as_str();
        }

        self.parts.headers.get(header::HOST).and_then(|value| value.to_str().ok()).unwrap_or_default()
    }

    /// The scheme of an absolute request target, empty for origin-form targets.
    pub fn scheme(&self) -> &str {
        self.parts.uri.scheme_str().unwrap_or_default()
    }
}

/// Variables captured while matching a route, in capture order.
///
/// For the pattern `/users/{id:[0-9]+}` and the path `/users/42`, `get("id")`
/// returns `"42"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if there are no path parameters
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the number of path parameters
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Gets the value of a parameter by its name, the last capture wins
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.params.iter().rev().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.params.truncate(len);
    }
}
