use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};
use tracing::debug;

use super::{CookieCodec, Session, SessionError};
use crate::ResponseWriter;

/// Attributes of every session cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: String,
    /// Seconds. Zero issues a browser-session cookie, negative deletes it.
    pub max_age: i64,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self { path: "/".into(), max_age: 86400 * 30, http_only: true }
    }
}

/// Loads sessions from request cookies and writes them back as `Set-Cookie`
/// headers. Holds no per-client state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    codec: CookieCodec,
    options: CookieOptions,
}

impl SessionStore {
    pub fn new(codec: CookieCodec, options: CookieOptions) -> Self {
        Self { codec, options }
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// The session `name` carried by the request, or a fresh one when the
    /// cookie is missing or fails to decode.
    pub fn load(&self, headers: &HeaderMap, name: &str) -> Session {
        let Some(value) = cookie_value(headers, name) else {
            return Session::new(name);
        };

        match self.decode(name, value) {
            Ok(session) => session,
            Err(e) => {
                debug!(cause = %e, session = name, "discarding session cookie");
                Session::new(name)
            }
        }
    }

    pub fn decode(&self, name: &str, value: &str) -> Result<Session, SessionError> {
        let json = self.codec.decode(name, value)?;
        Session::from_json(name, &json)
    }

    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        self.codec.encode(session.name(), &session.to_json()?)
    }

    /// The complete `Set-Cookie` value for the session.
    pub fn set_cookie(&self, session: &Session) -> Result<HeaderValue, SessionError> {
        let value = if self.options.max_age < 0 { String::new() } else { self.encode(session)? };
        let cookie = format_cookie(session.name(), &value, &self.options, Utc::now());
        HeaderValue::from_str(&cookie).map_err(|e| SessionError::Encoding(e.to_string()))
    }

    pub fn save(&self, session: &Session, response: &mut ResponseWriter) -> Result<(), SessionError> {
        let header = self.set_cookie(session)?;
        response.set_cookie(session.name(), header);
        Ok(())
    }
}

fn cookie_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

fn format_cookie(name: &str, value: &str, options: &CookieOptions, now: DateTime<Utc>) -> String {
    let mut cookie = format!("{name}={value}");

    if !options.path.is_empty() {
        cookie.push_str("; Path=");
        cookie.push_str(&options.path);
    }

    if options.max_age > 0 {
        // Max-Age alone still bounds the cookie when Expires is unrepresentable
        if let Some(expires) = expires_at(now, options.max_age) {
            cookie.push_str("; Expires=");
            cookie.push_str(&httpdate::fmt_http_date(expires));
        }
        cookie.push_str(&format!("; Max-Age={}", options.max_age));
    } else if options.max_age < 0 {
        cookie.push_str(&format!("; Expires={}; Max-Age=0", httpdate::fmt_http_date(UNIX_EPOCH)));
    }

    if options.http_only {
        cookie.push_str("; HttpOnly");
    }

    cookie
}

/// `None` past what an HTTP date can carry (year 9999).
fn expires_at(now: DateTime<Utc>, max_age: i64) -> Option<SystemTime> {
    let expires = now.checked_add_signed(TimeDelta::try_seconds(max_age)?)?;
    (expires.year() <= 9999).then(|| SystemTime::from(expires))
}
