//! Cookie-backed sessions.
//!
//! A [`Session`] is a bag of typed values plus named flash queues. It lives
//! entirely in one cookie per session name: the [`SessionStore`] serialises it
//! to JSON, then seals it with a [`CookieCodec`].

mod codec;
mod store;
mod value;

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::{CookieCodec, KeyPair};
pub use store::{CookieOptions, SessionStore};
pub use value::SessionValue;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("malformed cookie value: {0}")]
    Encoding(String),

    #[error("cookie value failed authentication")]
    MacMismatch,

    #[error("cookie value expired")]
    Expired,

    #[error("can't decrypt cookie value: {0}")]
    Decrypt(String),

    #[error("can't (de)serialize session: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid session key: {0}")]
    Key(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionData {
    #[serde(default)]
    values: BTreeMap<String, SessionValue>,
    #[serde(default)]
    flashes: BTreeMap<String, VecDeque<SessionValue>>,
}

/// The state of one named session for one request.
#[derive(Debug, Clone)]
pub struct Session {
    name: String,
    values: BTreeMap<String, SessionValue>,
    flashes: BTreeMap<String, VecDeque<SessionValue>>,
    is_new: bool,
}

impl Session {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), values: BTreeMap::new(), flashes: BTreeMap::new(), is_new: true }
    }

    fn from_data(name: impl Into<String>, data: SessionData) -> Self {
        Self { name: name.into(), values: data.values, flashes: data.flashes, is_new: false }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when no valid cookie was presented for this session.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get(&self, key: &str) -> Option<&SessionValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<SessionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        self.values.remove(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn has_string(&self, key: &str) -> bool {
        self.get(key).and_then(SessionValue::as_str).is_some()
    }

    pub fn has_bool(&self, key: &str) -> bool {
        self.get(key).and_then(SessionValue::as_bool).is_some()
    }

    pub fn has_int(&self, key: &str) -> bool {
        self.get(key).and_then(SessionValue::as_int).is_some()
    }

    /// The string stored under `key`, or `""` when absent or not a string.
    pub fn get_string(&self, key: &str) -> &str {
        self.get(key).and_then(SessionValue::as_str).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(SessionValue::as_bool).unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.get(key).and_then(SessionValue::as_int).unwrap_or_default()
    }

    pub fn get_bytes(&self, key: &str) -> &[u8] {
        self.get(key).and_then(SessionValue::as_bytes).unwrap_or_default()
    }

    pub fn add_flash(&mut self, key: impl Into<String>, value: impl Into<SessionValue>) {
        self.flashes.entry(key.into()).or_default().push_back(value.into());
    }

    /// Takes every flash queued under `key`.
    pub fn flashes(&mut self, key: &str) -> Vec<SessionValue> {
        self.flashes.remove(key).map(Vec::from).unwrap_or_default()
    }

    /// Takes the flashes under `key` and returns them as strings; non-string
    /// entries become `""`.
    pub fn string_flashes(&mut self, key: &str) -> Vec<String> {
        self.flashes(key).into_iter().map(|value| value.as_str().map(str::to_owned).unwrap_or_default()).collect()
    }

    /// Takes the flashes under `key` and returns the first one, or `""`.
    pub fn first_string_flash(&mut self, key: &str) -> String {
        self.string_flashes(key).into_iter().next().unwrap_or_default()
    }

    fn to_json(&self) -> Result<Vec<u8>, SessionError> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            values: &'a BTreeMap<String, SessionValue>,
            flashes: &'a BTreeMap<String, VecDeque<SessionValue>>,
        }

        Ok(serde_json::to_vec(&Borrowed { values: &self.values, flashes: &self.flashes })?)
    }

    fn from_json(name: &str, json: &[u8]) -> Result<Self, SessionError> {
        let data: SessionData = serde_json::from_slice(json)?;
        Ok(Self::from_data(name, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let mut session = Session::new("sess");
        session.set("user", "alice");
        session.set("admin", true);
        session.set("visits", 3i64);
        session.set("token", vec![1u8, 2, 3]);

        assert_eq!(session.get_string("user"), "alice");
        assert!(session.has_string("user"));
        assert!(!session.has_bool("user"));
        assert!(session.get_bool("admin"));
        assert_eq!(session.get_int("visits"), 3);
        assert!(session.has_int("visits"));
        assert_eq!(session.get_bytes("token"), &[1, 2, 3]);

        // mismatched type reads as the zero value
        assert_eq!(session.get_string("admin"), "");
        assert!(!session.get_bool("user"));
        assert_eq!(session.get_int("user"), 0);
        assert!(session.get_bytes("user").is_empty());

        assert_eq!(session.remove("user"), Some(SessionValue::from("alice")));
        assert!(!session.has("user"));
    }

    #[test]
    fn test_flashes_drain() {
        let mut session = Session::new("sess");
        session.add_flash("notice", "one");
        session.add_flash("notice", "two");
        session.add_flash("notice", 3i64);

        assert_eq!(session.string_flashes("notice"), vec!["one", "two", ""]);
        assert!(session.flashes("notice").is_empty());
    }

    #[test]
    fn test_first_string_flash_single_entry() {
        let mut session = Session::new("sess");
        session.add_flash("notice", "hello");

        assert_eq!(session.first_string_flash("notice"), "hello");
        assert_eq!(session.first_string_flash("notice"), "");
    }

    #[test]
    fn test_json_round_trip() {
        let mut session = Session::new("sess");
        session.set("user", "alice");
        session.add_flash("notice", "hi");

        let json = session.to_json().unwrap();
        let mut restored = Session::from_json("sess", &json).unwrap();

        assert!(!restored.is_new());
        assert_eq!(restored.get_string("user"), "alice");
        assert_eq!(restored.first_string_flash("notice"), "hi");
    }
}
