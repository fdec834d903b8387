//! Server configuration document.
//!
//! `ServerOptions` is read from and written to JSON with camelCase field
//! names. Every field has a default, so a document only needs the fields it
//! changes. Parsing and semantic validation are separate steps:
//! [`ServerOptions::load`] runs both, [`ServerOptions::validate`] reports
//! every problem at once.

mod keys;
mod validation;

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use validation::ValidationError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can't access config file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("can't parse config: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("can't serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid config: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Suffix of the daily log file names.
    pub file_log: String,
    /// Directory of the log files, created when missing.
    pub dir_log: String,
    pub file_perms: u32,
    pub dir_perms: u32,

    /// Length of a generated authentication key: 32 or 64.
    pub auth_key_size: usize,
    /// Length of a generated encryption key: 16, 24 or 32.
    pub enc_key_size: usize,
    /// Append a freshly generated key pair to `key_pairs` at startup.
    pub generate_keys: bool,
    /// Alternating authentication and encryption keys; the first pair signs
    /// new cookies, later ones only verify.
    #[serde(with = "keys")]
    pub key_pairs: Vec<Vec<u8>>,

    pub cookie_path: String,
    /// Seconds; 0 for browser-session cookies, negative deletes.
    pub max_age: i64,
    pub http_only: bool,

    /// Where `Server::new` saves these options; empty to skip saving.
    pub config_file: String,
    pub template_path: String,
    pub template_extension: String,
    pub watch_templates: bool,
    pub log_queue_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            file_log: "server".into(),
            dir_log: "log/".into(),
            file_perms: 0o644,
            dir_perms: 0o755,
            auth_key_size: 32,
            enc_key_size: 32,
            generate_keys: false,
            key_pairs: Vec::new(),
            cookie_path: "/".into(),
            max_age: 86400 * 30,
            http_only: true,
            config_file: String::new(),
            template_path: "templates/".into(),
            template_extension: ".html".into(),
            watch_templates: false,
            log_queue_capacity: 1024,
        }
    }
}

impl ServerOptions {
    /// Reads and validates a JSON document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let options = Self::from_json(&content)?;

        options.validate().map_err(ConfigError::Validation)?;
        Ok(options)
    }

    pub fn from_json(json: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(json).map_err(ConfigError::Parse)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validation::validate(self)
    }

    /// Writes the options as JSON, creating the file with `file_perms`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        let io_error = |source| ConfigError::Io { path: path.to_path_buf(), source };

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.file_perms);
        }

        let mut file = options.open(path).map_err(io_error)?;
        file.write_all(&json).map_err(io_error)?;
        file.flush().map_err(io_error)
    }

    /// Appends a random authentication key of `auth_key_size` bytes and a
    /// random encryption key of `enc_key_size` bytes to `key_pairs`.
    pub fn generate_key_pair(&mut self) {
        let mut rng = rand::thread_rng();
        for size in [self.auth_key_size, self.enc_key_size] {
            let mut key = vec![0u8; size];
            rng.fill_bytes(&mut key);
            self.key_pairs.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_document_uses_defaults() {
        let options = ServerOptions::from_json(br#"{"fileLog": "front", "generateKeys": true}"#).unwrap();
        assert_eq!(options.file_log, "front");
        assert!(options.generate_keys);
        assert_eq!(options.dir_log, "log/");
        assert_eq!(options.max_age, 86400 * 30);
        assert_eq!(options.log_queue_capacity, 1024);
        assert!(!options.watch_templates);
    }

    #[test]
    fn test_camel_case_names_and_base64_keys() {
        let mut options = ServerOptions::default();
        options.key_pairs = vec![b"0123456789abcdef0123456789abcdef".to_vec(), vec![0xff; 16]];

        let json: serde_json::Value = serde_json::from_slice(&options.to_json().unwrap()).unwrap();
        assert_eq!(json["fileLog"], "server");
        assert_eq!(json["httpOnly"], true);
        assert_eq!(json["keyPairs"][0], "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=");
        assert_eq!(json["keyPairs"][1], "/////////////////////w==");

        let back = ServerOptions::from_json(&options.to_json().unwrap()).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_bad_key_encoding() {
        let err = ServerOptions::from_json(br#"{"keyPairs": ["not base64!"]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_generate_key_pair_appends() {
        let mut options = ServerOptions { auth_key_size: 64, enc_key_size: 16, ..ServerOptions::default() };
        options.key_pairs.push(vec![1; 32]);
        options.key_pairs.push(vec![2; 32]);

        options.generate_key_pair();

        assert_eq!(options.key_pairs.len(), 4);
        assert_eq!(options.key_pairs[0], vec![1; 32]);
        assert_eq!(options.key_pairs[2].len(), 64);
        assert_eq!(options.key_pairs[3].len(), 16);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("front.json");

        let mut options = ServerOptions { generate_keys: true, file_perms: 0o600, ..ServerOptions::default() };
        options.generate_key_pair();
        options.save(&path).unwrap();

        assert_eq!(ServerOptions::load(&path).unwrap(), options);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(std::fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
        }
    }

    #[test]
    fn test_load_reports_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, br#"{"generateKeys": true, "authKeySize": 12, "encKeySize": 20}"#).unwrap();

        match ServerOptions::load(&path) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(ServerOptions::load(dir.path().join("missing.json")), Err(ConfigError::Io { .. })));
    }
}
