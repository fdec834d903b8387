//! Composable route constraints.
//!
//! Each route carries one [`AllFilter`] made of its host, scheme, method and
//! query constraints. Children are only tried once their parent's filter
//! passed, so a parent's constraints apply to its whole subtree.
//!
//! Filters that match variable text (host and query patterns) append what
//! they capture to the [`PathParams`] passed in.
//!
//! # Examples
//!
//! ```
//! use micro_front::router::filter::{all_filter, any_filter, get_method, head_method, query};
//!
//! let mut methods = any_filter();
//! methods.or(get_method()).or(head_method());
//!
//! let mut filters = all_filter();
//! filters.and(methods).and(query("page", "{page:[0-9]+}").unwrap());
//! ```

use std::sync::Arc;

use http::Method;

use super::pattern::{Pattern, PatternError};
use crate::{PathParams, RequestContext};

/// Core trait for route constraints.
///
/// The `Filter` trait requires `Send + Sync`, ensuring that filters
/// can be safely used in a multi-threaded environment.
pub trait Filter: Send + Sync {
    /// Check if the request matches this filter's criteria, capturing any
    /// variables into `params`.
    fn matches(&self, req: &RequestContext, params: &mut PathParams) -> bool;
}

/// A filter that wraps a closure.
struct FnFilter<F: Fn(&RequestContext) -> bool>(F);

impl<F: Fn(&RequestContext) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn matches(&self, req: &RequestContext, _params: &mut PathParams) -> bool {
        (self.0)(req)
    }
}

/// Creates a new filter from a closure.
///
/// # Example
/// ```
/// use micro_front::router::filter::fn_filter;
///
/// let ajax_only = fn_filter(|req| req.headers().contains_key("x-requested-with"));
/// ```
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// Creates a new OR-composed filter chain.
pub fn any_filter() -> AnyFilter {
    AnyFilter::new()
}

/// Compose filters with OR logic.
///
/// An empty filter chain returns true by default.
pub struct AnyFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl AnyFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the OR chain.
    pub fn or<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for AnyFilter {
    fn matches(&self, req: &RequestContext, params: &mut PathParams) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        let mark = params.len();
        for filter in &self.filters {
            if filter.matches(req, params) {
                return true;
            }
            params.truncate(mark);
        }

        false
    }
}

/// Creates a new AND-composed filter chain.
pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// Compose filters with AND logic.
///
/// All inner filters must succeed for the whole filter to succeed.
/// An empty filter chain returns true by default.
pub struct AllFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the AND chain.
    pub fn and<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Add a filter that is also used elsewhere, such as a parent route's.
    pub fn and_shared(&mut self, filter: Arc<dyn Filter>) -> &mut Self {
        self.filters.push(filter);
        self
    }
}

impl Filter for AllFilter {
    fn matches(&self, req: &RequestContext, params: &mut PathParams) -> bool {
        let mark = params.len();
        for filter in &self.filters {
            if !filter.matches(req, params) {
                params.truncate(mark);
                return false;
            }
        }

        true
    }
}

/// A filter that matches HTTP methods.
#[derive(Debug)]
pub struct MethodFilter(Method);

impl MethodFilter {
    pub fn new(method: Method) -> Self {
        Self(method)
    }
}

impl Filter for MethodFilter {
    fn matches(&self, req: &RequestContext, _params: &mut PathParams) -> bool {
        self.0.eq(req.method())
    }
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Creates a filter that matches HTTP ", stringify!($upper_case_method), " requests.")]
        #[inline]
        pub fn $method() -> MethodFilter {
            MethodFilter(Method::$upper_case_method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(connect_method, CONNECT);
method_filter!(patch_method, PATCH);
method_filter!(trace_method, TRACE);

/// Matches the request scheme against a set of names.
///
/// Requests in origin form carry no scheme; they are treated as `http`. The
/// empty name in the set matches only those requests.
#[derive(Debug)]
pub struct SchemeFilter {
    schemes: Vec<String>,
}

pub fn scheme<I, S>(schemes: I) -> SchemeFilter
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    SchemeFilter { schemes: schemes.into_iter().map(|s| s.into().to_ascii_lowercase()).collect() }
}

impl Filter for SchemeFilter {
    fn matches(&self, req: &RequestContext, _params: &mut PathParams) -> bool {
        if self.schemes.is_empty() {
            return true;
        }

        let scheme = req.scheme();
        let effective = if scheme.is_empty() { "http" } else { scheme };
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(effective) || s.as_str() == scheme)
    }
}

/// Matches the request host against a pattern. A port in the request is
/// ignored unless the pattern names one.
#[derive(Debug)]
pub struct HostFilter(Arc<Pattern>);

pub fn host(pattern: Arc<Pattern>) -> HostFilter {
    HostFilter(pattern)
}

impl Filter for HostFilter {
    fn matches(&self, req: &RequestContext, params: &mut PathParams) -> bool {
        let host = req.host();
        let host = if self.0.has_port() { host } else { strip_port(host) };
        self.0.captures(host, params)
    }
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literal
    if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        return &host[..end + 2];
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

/// The value side of a query constraint.
#[derive(Debug, Clone)]
pub enum QueryValue {
    /// The key must be present, any value.
    Any,
    Literal(String),
    Pattern(Arc<Pattern>),
}

impl QueryValue {
    /// An empty template means presence only, a template with variables is
    /// a pattern, anything else must match literally.
    pub fn parse(template: &str) -> Result<Self, PatternError> {
        if template.is_empty() {
            return Ok(Self::Any);
        }
        if template.contains('{') {
            return Ok(Self::Pattern(Arc::new(Pattern::query(template)?)));
        }
        Ok(Self::Literal(template.to_owned()))
    }
}

/// Matches one query parameter.
#[derive(Debug)]
pub struct QueryFilter {
    key: String,
    value: QueryValue,
}

pub fn query(key: impl Into<String>, value: &str) -> Result<QueryFilter, PatternError> {
    Ok(QueryFilter { key: key.into(), value: QueryValue::parse(value)? })
}

impl QueryFilter {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &QueryValue {
        &self.value
    }
}

impl Filter for QueryFilter {
    fn matches(&self, req: &RequestContext, params: &mut PathParams) -> bool {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(req.query().unwrap_or_default()).unwrap_or_default();

        pairs.iter().filter(|(key, _)| *key == self.key).any(|(_, value)| match &self.value {
            QueryValue::Any => true,
            QueryValue::Literal(literal) => literal == value,
            QueryValue::Pattern(pattern) => pattern.captures(value, params),
        })
    }
}
