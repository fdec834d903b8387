//! The route table.
//!
//! Routes form a tree in registration order. Matching walks it depth first:
//! a node must pass its filter (host, scheme, method, queries), then it is
//! tried as a full match on the path, then its children are tried when the
//! node's path is a prefix of the request path. Host-only nodes, registered
//! through [`RouteTable::add_host`], have no handler and only gate their
//! children.

pub mod filter;
pub mod pattern;

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, Uri};
use thiserror::Error;

use crate::handler::Handler;
use crate::redirect::Redirectors;
use crate::{PathParams, RequestContext};
use filter::{AllFilter, Filter, MethodFilter, QueryValue};
use pattern::{Pattern, PatternError};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("parent route {0:?} not found")]
    UnknownParent(String),

    #[error("route name {0:?} already registered")]
    DuplicateName(String),

    #[error("no route named {0:?}")]
    UnknownRoute(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("built url is invalid: {0}")]
    Uri(#[from] http::uri::InvalidUri),
}

/// What to register: a path, a name and a handler, plus optional
/// constraints.
pub struct RouteSpec {
    name: String,
    path: String,
    schemes: Vec<String>,
    methods: Vec<Method>,
    queries: Vec<(String, String)>,
    parent: Option<String>,
    handler: Arc<dyn Handler>,
    redirectors: Redirectors,
    filters: Vec<Arc<dyn Filter>>,
}

impl RouteSpec {
    pub fn new(path: impl Into<String>, name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            schemes: Vec::new(),
            methods: Vec::new(),
            queries: Vec::new(),
            parent: None,
            handler: Arc::new(handler),
            redirectors: Redirectors::none(),
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemes.extend(schemes.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    /// Query constraints: an empty value requires the key only, `{name}` or
    /// `{name:regex}` captures, anything else must match literally.
    #[must_use]
    pub fn queries<I, K, V>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.queries.extend(queries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Registers the route under the named parent, which prefixes its path
    /// and gates its matching.
    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn redirectors(mut self, redirectors: Redirectors) -> Self {
        self.redirectors = redirectors;
        self
    }

    #[must_use]
    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

macro_rules! method_route {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("A route answering HTTP ", stringify!($upper_case_method), " requests.")]
        pub fn $method(path: impl Into<String>, name: impl Into<String>, handler: impl Handler + 'static) -> RouteSpec {
            RouteSpec::new(path, name, handler).methods([Method::$upper_case_method])
        }
    };
}

method_route!(get, GET);
method_route!(post, POST);
method_route!(put, PUT);
method_route!(delete, DELETE);
method_route!(head, HEAD);
method_route!(options, OPTIONS);
method_route!(connect, CONNECT);
method_route!(patch, PATCH);
method_route!(trace, TRACE);

struct RouteNode {
    name: String,
    host: Option<Arc<Pattern>>,
    path: Option<Pattern>,
    schemes: Vec<String>,
    queries: Vec<(String, QueryValue)>,
    filter: AllFilter,
    handler: Option<Arc<dyn Handler>>,
    redirectors: Redirectors,
    children: Vec<usize>,
}

/// The routes of one server.
#[derive(Default)]
pub struct RouteTable {
    nodes: Vec<RouteNode>,
    roots: Vec<usize>,
    names: HashMap<String, usize>,
}

/// A matched route and the variables captured while matching it.
pub struct RouteMatch<'t> {
    node: &'t RouteNode,
    params: PathParams,
}

impl RouteMatch<'_> {
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn into_params(self) -> PathParams {
        self.params
    }

    pub fn redirectors(&self) -> &Redirectors {
        &self.node.redirectors
    }

    pub fn handler(&self) -> Option<&Arc<dyn Handler>> {
        self.node.handler.as_ref()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Registers a handler-less node constraining the host; an empty pattern
    /// matches any host. Routes added under it as children inherit the host.
    pub fn add_host(&mut self, pattern: &str, name: impl Into<String>) -> Result<(), RouteError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(RouteError::DuplicateName(name));
        }

        let mut filter = filter::all_filter();
        let host = if pattern.is_empty() {
            None
        } else {
            let host = Arc::new(Pattern::host(pattern)?);
            filter.and(filter::host(Arc::clone(&host)));
            Some(host)
        };

        self.insert(
            None,
            RouteNode {
                name,
                host,
                path: None,
                schemes: Vec::new(),
                queries: Vec::new(),
                filter,
                handler: None,
                redirectors: Redirectors::none(),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn add(&mut self, spec: RouteSpec) -> Result<(), RouteError> {
        let RouteSpec { name, path, schemes, methods, queries, parent, handler, redirectors, filters } = spec;

        if self.names.contains_key(&name) {
            return Err(RouteError::DuplicateName(name));
        }

        let parent = match parent {
            Some(parent) => Some(*self.names.get(&parent).ok_or(RouteError::UnknownParent(parent))?),
            None => None,
        };
        let parent_node = parent.map(|index| &self.nodes[index]);

        let full_path = match parent_node.and_then(|node| node.path.as_ref()) {
            Some(prefix) => format!("{}{}", prefix.template().trim_end_matches('/'), path),
            None => path,
        };
        let path = Pattern::path(&full_path)?;

        let mut filter = filter::all_filter();
        if !schemes.is_empty() {
            filter.and(filter::scheme(schemes.iter().cloned()));
        }
        if !methods.is_empty() {
            let mut any = filter::any_filter();
            for method in methods {
                any.or(MethodFilter::new(method));
            }
            filter.and(any);
        }

        let mut query_values = parent_node.map(|node| node.queries.clone()).unwrap_or_default();
        for (key, value) in &queries {
            let query = filter::query(key.as_str(), value)?;
            query_values.push((key.clone(), query.value().clone()));
            filter.and(query);
        }
        for extra in filters {
            filter.and_shared(extra);
        }

        let schemes = if schemes.is_empty() { parent_node.map(|node| node.schemes.clone()).unwrap_or_default() } else { schemes };
        let host = parent_node.and_then(|node| node.host.clone());

        self.insert(
            parent,
            RouteNode {
                name,
                host,
                path: Some(path),
                schemes,
                queries: query_values,
                filter,
                handler: Some(handler),
                redirectors,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    fn insert(&mut self, parent: Option<usize>, node: RouteNode) {
        let index = self.nodes.len();
        self.names.insert(node.name.clone(), index);
        self.nodes.push(node);

        match parent {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
    }

    /// The first route, in tree order, that matches the request.
    pub fn at(&self, req: &RequestContext) -> Option<RouteMatch<'_>> {
        let mut params = PathParams::empty();
        self.roots
            .iter()
            .find_map(|&root| self.match_node(root, req, &mut params))
            .map(|index| RouteMatch { node: &self.nodes[index], params })
    }

    fn match_node(&self, index: usize, req: &RequestContext, params: &mut PathParams) -> Option<usize> {
        let node = &self.nodes[index];
        let mark = params.len();

        if !node.filter.matches(req, params) {
            return None;
        }

        if node.handler.is_some()
            && let Some(path) = &node.path
            && path.captures(req.path(), params)
        {
            return Some(index);
        }

        if node.path.as_ref().is_none_or(|path| path.is_prefix_of(req.path())) {
            for &child in &node.children {
                if let Some(found) = self.match_node(child, req, params) {
                    return Some(found);
                }
            }
        }

        params.truncate(mark);
        None
    }

    /// Builds the URL of route `name` from `vars`, which must satisfy every
    /// variable's pattern. Routes with a host yield an absolute URL.
    pub fn get_url(&self, name: &str, vars: &[(&str, &str)]) -> Result<Uri, RouteError> {
        let index = *self.names.get(name).ok_or_else(|| RouteError::UnknownRoute(name.to_owned()))?;
        let node = &self.nodes[index];

        let mut url = String::new();
        if let Some(host) = &node.host {
            let scheme = node.schemes.iter().find(|s| !s.is_empty()).map_or("http", String::as_str);
            url.push_str(scheme);
            url.push_str("://");
            url.push_str(&host.build(vars)?);
        }

        match &node.path {
            Some(path) => url.push_str(&path.build(vars)?),
            None => url.push('/'),
        }

        let mut query = Vec::new();
        for (key, value) in &node.queries {
            match value {
                QueryValue::Any => {
                    let value = vars.iter().find(|(name, _)| name == key).map_or("", |(_, v)| *v);
                    query.push((key.clone(), value.to_owned()));
                }
                QueryValue::Literal(literal) => query.push((key.clone(), literal.clone())),
                QueryValue::Pattern(pattern) => query.push((key.clone(), pattern.build(vars)?)),
            }
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&serde_urlencoded::to_string(&query).unwrap_or_default());
        }

        Ok(Uri::try_from(url)?)
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|node| node.name.as_str()).collect();
        f.debug_struct("RouteTable").field("routes", &names).finish()
    }
}

impl std::fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteSpec")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("schemes", &self.schemes)
            .field("methods", &self.methods)
            .field("queries", &self.queries)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for RouteMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch").field("name", &self.node.name).field("params", &self.params).finish()
    }
}
