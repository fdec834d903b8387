//! Route templates with named, optionally constrained variables.
//!
//! A template mixes literal text with variables written `{name}` or
//! `{name:regex}`. A variable without a regex matches one path segment
//! (`[^/]+`), one host label (`[^.]+`) or any query value (`.*`), depending on
//! where the template is used. Braces inside the regex are balanced, so
//! `{code:[0-9]{3}}` is one variable.

use regex::Regex;
use thiserror::Error;

use crate::PathParams;

const PATH_DEFAULT: &str = "[^/]+";
const HOST_DEFAULT: &str = "[^.]+";
const QUERY_DEFAULT: &str = ".*";

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("unbalanced braces in {0:?}")]
    Unbalanced(String),

    #[error("missing variable name in {0:?}")]
    MissingName(String),

    #[error("variable {name:?} appears twice in {template:?}")]
    DuplicateVar { name: String, template: String },

    #[error("invalid regex in {template:?}: {source}")]
    Regex { template: String, source: regex::Error },

    #[error("missing value for variable {0:?}")]
    MissingValue(String),

    #[error("value {value:?} for variable {name:?} doesn't match {regex:?}")]
    Mismatch { name: String, value: String, regex: String },
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(usize),
}

#[derive(Debug, Clone)]
struct Var {
    name: String,
    source: String,
    // the variable's own regex anchored on both ends, for reverse building
    regex: Regex,
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Pattern {
    template: String,
    segments: Vec<Segment>,
    vars: Vec<Var>,
    full: Regex,
    prefix: Regex,
}

impl Pattern {
    pub fn path(template: &str) -> Result<Self, PatternError> {
        Self::compile(template, PATH_DEFAULT)
    }

    pub fn host(template: &str) -> Result<Self, PatternError> {
        Self::compile(template, HOST_DEFAULT)
    }

    pub fn query(template: &str) -> Result<Self, PatternError> {
        Self::compile(template, QUERY_DEFAULT)
    }

    fn compile(template: &str, default_regex: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut vars: Vec<Var> = Vec::new();
        let mut source = String::from("^");

        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let close = closing_brace(rest, open).ok_or_else(|| PatternError::Unbalanced(template.to_owned()))?;

            push_literal(&rest[..open], template, &mut segments, &mut source)?;

            let inner = &rest[open + 1..close];
            let (name, regex) = match inner.split_once(':') {
                Some((name, regex)) => (name.trim(), regex.trim()),
                None => (inner.trim(), default_regex),
            };

            if name.is_empty() {
                return Err(PatternError::MissingName(template.to_owned()));
            }
            if vars.iter().any(|var| var.name == name) {
                return Err(PatternError::DuplicateVar { name: name.to_owned(), template: template.to_owned() });
            }

            let index = vars.len();
            source.push_str(&format!("(?P<v{index}>{regex})"));
            vars.push(Var { name: name.to_owned(), source: regex.to_owned(), regex: regex_of(&format!("^(?:{regex})$"), template)? });
            segments.push(Segment::Var(index));

            rest = &rest[close + 1..];
        }
        push_literal(rest, template, &mut segments, &mut source)?;

        let prefix = regex_of(&source, template)?;
        source.push('$');
        let full = regex_of(&source, template)?;

        Ok(Self { template: template.to_owned(), segments, vars, full, prefix })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn var_names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|var| var.name.as_str())
    }

    /// True when the literal part of the template names a port.
    pub fn has_port(&self) -> bool {
        self.segments.iter().any(|segment| matches!(segment, Segment::Literal(text) if text.contains(':')))
    }

    /// Matches the whole input, appending captured variables to `params`.
    pub fn captures(&self, input: &str, params: &mut PathParams) -> bool {
        let Some(captures) = self.full.captures(input) else {
            return false;
        };

        for (index, var) in self.vars.iter().enumerate() {
            if let Some(value) = captures.name(&format!("v{index}")) {
                params.push(var.name.as_str(), value.as_str());
            }
        }
        true
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.full.is_match(input)
    }

    /// Matches the start of the input, as a subrouter prefix does.
    pub fn is_prefix_of(&self, input: &str) -> bool {
        self.prefix.is_match(input)
    }

    /// Substitutes variables back into the template, checking each value
    /// against its variable's regex.
    pub fn build(&self, values: &[(&str, &str)]) -> Result<String, PatternError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(index) => {
                    let var = &self.vars[*index];
                    let value = values
                        .iter()
                        .find(|(name, _)| *name == var.name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| PatternError::MissingValue(var.name.clone()))?;

                    if !var.regex.is_match(value) {
                        return Err(PatternError::Mismatch {
                            name: var.name.clone(),
                            value: value.to_owned(),
                            regex: var.source.clone(),
                        });
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn push_literal(text: &str, template: &str, segments: &mut Vec<Segment>, source: &mut String) -> Result<(), PatternError> {
    if text.contains('}') {
        return Err(PatternError::Unbalanced(template.to_owned()));
    }
    if !text.is_empty() {
        source.push_str(&regex::escape(text));
        segments.push(Segment::Literal(text.to_owned()));
    }
    Ok(())
}

fn regex_of(source: &str, template: &str) -> Result<Regex, PatternError> {
    Regex::new(source).map_err(|source| PatternError::Regex { template: template.to_owned(), source })
}

fn closing_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in text[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_path() {
        let pattern = Pattern::path("/about.html").unwrap();
        assert!(pattern.is_match("/about.html"));
        assert!(!pattern.is_match("/aboutXhtml"));
        assert!(!pattern.is_match("/about.html/more"));
        assert_eq!(pattern.var_names().count(), 0);
    }

    #[test]
    fn test_default_var_matches_one_segment() {
        let pattern = Pattern::path("/users/{name}").unwrap();
        let mut params = PathParams::empty();

        assert!(pattern.captures("/users/alice", &mut params));
        assert_eq!(params.get("name"), Some("alice"));
        assert!(!pattern.is_match("/users/alice/posts"));
        assert!(!pattern.is_match("/users/"));
    }

    #[test]
    fn test_constrained_var() {
        let pattern = Pattern::path("/users/{id:[0-9]+}").unwrap();
        let mut params = PathParams::empty();

        assert!(pattern.captures("/users/42", &mut params));
        assert_eq!(params.get("id"), Some("42"));
        assert!(!pattern.captures("/users/x", &mut params));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_nested_braces_in_regex() {
        let pattern = Pattern::path("/codes/{code:[0-9]{3}}").unwrap();
        assert!(pattern.is_match("/codes/404"));
        assert!(!pattern.is_match("/codes/4040"));
    }

    #[test]
    fn test_asset_pattern() {
        let pattern = Pattern::path(r"/css/{asset:[a-z0-9A-Z_]+(\.css)}").unwrap();
        let mut params = PathParams::empty();
        assert!(pattern.captures("/css/site.css", &mut params));
        assert_eq!(params.get("asset"), Some("site.css"));
        assert!(!pattern.is_match("/css/../secret.css"));
        assert!(!pattern.is_match("/css/site.js"));
    }

    #[test]
    fn test_host_pattern() {
        let pattern = Pattern::host("{tenant}.example.com").unwrap();
        let mut params = PathParams::empty();
        assert!(pattern.captures("acme.example.com", &mut params));
        assert_eq!(params.get("tenant"), Some("acme"));
        assert!(!pattern.is_match("a.b.example.com"));
        assert!(!pattern.has_port());
        assert!(Pattern::host("localhost:8080").unwrap().has_port());
    }

    #[test]
    fn test_prefix() {
        let pattern = Pattern::path("/admin").unwrap();
        assert!(pattern.is_prefix_of("/admin/users"));
        assert!(!pattern.is_prefix_of("/public/admin"));
    }

    #[test]
    fn test_build() {
        let pattern = Pattern::path("/users/{id:[0-9]+}/posts/{slug}").unwrap();
        assert_eq!(pattern.build(&[("id", "42"), ("slug", "hello")]).unwrap(), "/users/42/posts/hello");

        assert!(matches!(pattern.build(&[("id", "x"), ("slug", "hello")]), Err(PatternError::Mismatch { .. })));
        assert!(matches!(pattern.build(&[("id", "42")]), Err(PatternError::MissingValue(name)) if name == "slug"));
    }

    #[test]
    fn test_invalid_templates() {
        assert!(matches!(Pattern::path("/users/{id"), Err(PatternError::Unbalanced(_))));
        assert!(matches!(Pattern::path("/users/id}"), Err(PatternError::Unbalanced(_))));
        assert!(matches!(Pattern::path("/users/{:[0-9]+}"), Err(PatternError::MissingName(_))));
        assert!(matches!(Pattern::path("/{a}/{a}"), Err(PatternError::DuplicateVar { .. })));
        assert!(matches!(Pattern::path("/{a:[0-9}"), Err(PatternError::Unbalanced(_)) | Err(PatternError::Regex { .. })));
    }
}
