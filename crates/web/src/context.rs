//! The per-request view handlers and redirectors work through.

use std::collections::HashMap;
use std::fmt;

use http::header::{CONTENT_TYPE, LOCATION, REFERER};
use http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use minijinja::HtmlEscape;
use serde::Serialize;

use crate::server::Shared;
use crate::session::{Session, SessionError, SessionValue};
use crate::{PathParams, RequestContext, ResponseWriter};

/// Request data, response writer and server services for one request.
///
/// Sessions are loaded from the request cookies on first use and cached
/// until dispatch ends. The `*_session_value` and flash helpers save the
/// session into the response after mutating it.
pub struct HandlerContext<'a> {
    shared: &'a Shared,
    request: &'a RequestContext,
    params: PathParams,
    response: ResponseWriter,
    sessions: HashMap<String, Session>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(shared: &'a Shared, request: &'a RequestContext, params: PathParams) -> Self {
        Self { shared, request, params, response: ResponseWriter::new(), sessions: HashMap::new() }
    }

    pub(crate) fn into_response(self) -> ResponseWriter {
        self.response
    }

    pub fn request(&self) -> &RequestContext {
        self.request
    }

    pub fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn method_str(&self) -> &str {
        self.request.method().as_str()
    }

    pub fn is_get(&self) -> bool {
        self.method() == Method::GET
    }

    pub fn is_post(&self) -> bool {
        self.method() == Method::POST
    }

    pub fn is_put(&self) -> bool {
        self.method() == Method::PUT
    }

    pub fn is_connect(&self) -> bool {
        self.method() == Method::CONNECT
    }

    pub fn is_trace(&self) -> bool {
        self.method() == Method::TRACE
    }

    pub fn is_delete(&self) -> bool {
        self.method() == Method::DELETE
    }

    pub fn is_head(&self) -> bool {
        self.method() == Method::HEAD
    }

    pub fn is_options(&self) -> bool {
        self.method() == Method::OPTIONS
    }

    pub fn url(&self) -> &Uri {
        self.request.uri()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// The `Referer` header, or "" when absent.
    pub fn referrer(&self) -> &str {
        self.request.headers().get(REFERER).and_then(|v| v.to_str().ok()).unwrap_or_default()
    }

    /// The decoded query string; a key may carry several values.
    pub fn query(&self) -> HashMap<String, Vec<String>> {
        multimap(parse_pairs(self.request.query().unwrap_or_default().as_bytes()))
    }

    /// First value of `key` in the url-encoded request body, or "".
    pub fn post_form_value(&self, key: &str) -> String {
        self.form_pairs().into_iter().find(|(k, _)| k == key).map(|(_, v)| v).unwrap_or_default()
    }

    /// Like [`post_form_value`](Self::post_form_value), falling back to the
    /// query string.
    pub fn form_value(&self, key: &str) -> String {
        self.form_pairs()
            .into_iter()
            .chain(parse_pairs(self.request.query().unwrap_or_default().as_bytes()))
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }

    fn form_pairs(&self) -> Vec<(String, String)> {
        let is_form = self
            .request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .is_some_and(|m| m.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str());

        if is_form { parse_pairs(self.request.body()) } else { Vec::new() }
    }

    /// A variable captured by the route's host, path or query patterns.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn vars(&self) -> &PathParams {
        &self.params
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response.set_header(name, value);
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.response.write(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.response.write_str(s);
    }

    /// Answers with `code` and a `Location` of `uri`. GET requests also get
    /// a short HTML body linking to the target.
    pub fn redirect(&mut self, uri: &str, code: StatusCode) {
        let Ok(location) = HeaderValue::from_str(uri) else {
            self.println(format!("Error redirect: invalid location {uri:?}"));
            self.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            return;
        };

        self.response.set_header(LOCATION, location);
        self.response.set_status(code);
        self.response.clear_body();

        if self.is_get() {
            self.response.set_header(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            let reason = code.canonical_reason().unwrap_or_default();
            self.response.write_str(&format!("<a href=\"{}\">{reason}</a>.\n", HtmlEscape(uri)));
        }
    }

    /// Renders template set `name` into the response body. Failures are
    /// written to the server log.
    #[track_caller]
    pub fn render_template(&mut self, name: &str, data: impl Serialize) {
        if let Err(e) = self.shared.templates.execute(&mut self.response, name, data) {
            self.shared.logger.println(format!("Error renderTemplate: {e}"));
        }
    }

    #[track_caller]
    pub fn println(&self, msg: impl AsRef<str>) {
        self.shared.logger.println(msg);
    }

    /// See [`Server::get_url`](crate::Server::get_url).
    #[track_caller]
    pub fn get_url(&self, name: &str, vars: &[(&str, &str)]) -> Option<Uri> {
        self.shared.get_url(name, vars)
    }

    /// The session `name`, loaded from the request cookie on first access.
    pub fn session(&mut self, name: &str) -> &mut Session {
        let (store, headers) = (&self.shared.sessions, self.request.headers());
        self.sessions.entry(name.to_owned()).or_insert_with(|| store.load(headers, name))
    }

    /// Writes session `name` into the response as a `Set-Cookie` header.
    pub fn save_session(&mut self, name: &str) -> Result<(), SessionError> {
        self.session(name);
        let Self { shared, sessions, response, .. } = self;
        match sessions.get(name) {
            Some(session) => shared.sessions.save(session, response),
            None => Ok(()),
        }
    }

    #[track_caller]
    fn save_logged(&mut self, name: &str) {
        if let Err(e) = self.save_session(name) {
            self.shared.logger.println(format!("Error saving session {name}: {e}"));
        }
    }

    #[track_caller]
    pub fn set_session_value(&mut self, name: &str, key: &str, value: impl Into<SessionValue>) {
        self.session(name).set(key, value);
        self.save_logged(name);
    }

    #[track_caller]
    pub fn remove_session_value(&mut self, name: &str, key: &str) {
        self.session(name).remove(key);
        self.save_logged(name);
    }

    pub fn has_session_value(&mut self, name: &str, key: &str) -> bool {
        self.session(name).has(key)
    }

    pub fn get_string_session_value(&mut self, name: &str, key: &str) -> String {
        self.session(name).get_string(key).to_owned()
    }

    pub fn has_string_session_value(&mut self, name: &str, key: &str) -> bool {
        self.session(name).has_string(key)
    }

    pub fn get_bool_session_value(&mut self, name: &str, key: &str) -> bool {
        self.session(name).get_bool(key)
    }

    pub fn has_bool_session_value(&mut self, name: &str, key: &str) -> bool {
        self.session(name).has_bool(key)
    }

    pub fn get_int_session_value(&mut self, name: &str, key: &str) -> i64 {
        self.session(name).get_int(key)
    }

    /// Queues `message` under `flash_key` for a later request.
    #[track_caller]
    pub fn set_flash_message(&mut self, name: &str, message: &str, flash_key: &str) {
        self.session(name).add_flash(flash_key, message);
        self.save_logged(name);
    }

    /// Drains the string flashes under `flash_key`.
    #[track_caller]
    pub fn get_string_flash_messages(&mut self, name: &str, flash_key: &str) -> Vec<String> {
        let messages = self.session(name).string_flashes(flash_key);
        self.save_logged(name);
        messages
    }

    /// Drains the flashes under `flash_key`, returning the first or "".
    #[track_caller]
    pub fn get_first_string_flash_message(&mut self, name: &str, flash_key: &str) -> String {
        let message = self.session(name).first_string_flash(flash_key);
        self.save_logged(name);
        message
    }
}

impl fmt::Display for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uri = self.request.uri();
        write!(
            f,
            "Method={} URL={} Scheme={} Host={}",
            self.method_str(),
            uri,
            uri.scheme_str().unwrap_or_default(),
            uri.authority().map(http::uri::Authority::as_str).unwrap_or_default()
        )
    }
}

impl fmt::Debug for HandlerContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("method", self.method())
            .field("uri", self.url())
            .field("params", &self.params)
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn parse_pairs(input: &[u8]) -> Vec<(String, String)> {
    serde_urlencoded::from_bytes(input).unwrap_or_default()
}

fn multimap(pairs: Vec<(String, String)>) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in pairs {
        map.entry(key).or_default().push(value);
    }
    map
}
