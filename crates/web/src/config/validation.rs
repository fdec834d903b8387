//! Semantic checks on a parsed [`ServerOptions`].
//!
//! Returns every problem found, not just the first.

use std::fmt;

use super::ServerOptions;

/// Upper bound of `maxAge`, in seconds: 100 years.
const MAX_AGE_LIMIT: i64 = 100 * 365 * 86400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub(super) fn validate(options: &ServerOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.file_log.is_empty() {
        errors.push(ValidationError::new("fileLog", "must not be empty"));
    }
    if options.file_perms > 0o7777 {
        errors.push(ValidationError::new("filePerms", format!("{:o} is not a permission mode", options.file_perms)));
    }
    if options.dir_perms > 0o7777 {
        errors.push(ValidationError::new("dirPerms", format!("{:o} is not a permission mode", options.dir_perms)));
    }

    if options.generate_keys {
        if !matches!(options.auth_key_size, 32 | 64) {
            errors.push(ValidationError::new("authKeySize", format!("must be 32 or 64, got {}", options.auth_key_size)));
        }
        if !matches!(options.enc_key_size, 16 | 24 | 32) {
            errors.push(ValidationError::new("encKeySize", format!("must be 16, 24 or 32, got {}", options.enc_key_size)));
        }
    } else if options.key_pairs.is_empty() {
        errors.push(ValidationError::new("keyPairs", "required unless generateKeys is set"));
    }

    for (index, key) in options.key_pairs.iter().enumerate() {
        if index % 2 == 0 && key.is_empty() {
            errors.push(ValidationError::new("keyPairs", format!("authentication key {index} is empty")));
        }
        if index % 2 == 1 && !matches!(key.len(), 16 | 24 | 32) {
            errors.push(ValidationError::new(
                "keyPairs",
                format!("encryption key {index} must be 16, 24 or 32 bytes, got {}", key.len()),
            ));
        }
    }

    if options.max_age > MAX_AGE_LIMIT {
        errors.push(ValidationError::new("maxAge", format!("must be at most {MAX_AGE_LIMIT} seconds, got {}", options.max_age)));
    }

    if options.log_queue_capacity == 0 {
        errors.push(ValidationError::new("logQueueCapacity", "must be positive"));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
