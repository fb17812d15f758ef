//! Cache Key Module
//!
//! Builds concrete cache keys from templates with composite-format
//! placeholders (`{0}`, `{1}`, ...) and typed parameters.
//!
//! Rendering never depends on locale: numbers and booleans use their
//! `Display` form, entity parameters render their id, id lists are reduced to
//! a SHA-256 digest, and structured values are serialized as compact JSON.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

// == Entity ==
/// A persisted entity that is identified in cache keys by its integer id.
pub trait Entity {
    fn entity_id(&self) -> i64;
}

// == Key Parameter ==
/// One typed parameter substituted into a key template.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyParam {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// Identifier list, rendered as a digest of its sorted form
    Ids(Vec<i64>),
    Entity(i64),
    Json(Value),
}

impl KeyParam {
    /// Parameter standing for `entity`, rendered as its id.
    pub fn entity(entity: &impl Entity) -> Self {
        KeyParam::Entity(entity.entity_id())
    }

    /// Renders the parameter into `out`.
    fn render_into(&self, out: &mut String) {
        match self {
            KeyParam::Null => out.push_str("null"),
            KeyParam::Bool(b) => out.push_str(&b.to_string()),
            KeyParam::Int(n) => out.push_str(&n.to_string()),
            KeyParam::UInt(n) => out.push_str(&n.to_string()),
            KeyParam::Float(x) => out.push_str(&x.to_string()),
            KeyParam::Str(s) => out.push_str(s),
            KeyParam::Entity(id) => out.push_str(&id.to_string()),
            KeyParam::Ids(ids) => out.push_str(&ids_hash(ids)),
            KeyParam::Json(value) => out.push_str(&value.to_string()),
        }
    }
}

impl fmt::Display for KeyParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rendered = String::new();
        self.render_into(&mut rendered);
        f.write_str(&rendered)
    }
}

/// Digest of a sorted id list; empty lists render as an empty string.
fn ids_hash(ids: &[i64]) -> String {
    if ids.is_empty() {
        return String::new();
    }

    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    let joined = sorted
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    Sha256::digest(joined.as_bytes())
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect()
}

macro_rules! impl_from_for_key_param {
    ($variant:ident as $target:ty: $($source:ty),+) => {
        $(
            impl From<$source> for KeyParam {
                fn from(value: $source) -> Self {
                    KeyParam::$variant(value as $target)
                }
            }
        )+
    };
}

impl_from_for_key_param!(Int as i64: i8, i16, i32, i64);
impl_from_for_key_param!(UInt as u64: u8, u16, u32, u64, usize);
impl_from_for_key_param!(Float as f64: f32, f64);

impl From<bool> for KeyParam {
    fn from(value: bool) -> Self {
        KeyParam::Bool(value)
    }
}

impl From<&str> for KeyParam {
    fn from(value: &str) -> Self {
        KeyParam::Str(value.to_string())
    }
}

impl From<String> for KeyParam {
    fn from(value: String) -> Self {
        KeyParam::Str(value)
    }
}

impl From<&String> for KeyParam {
    fn from(value: &String) -> Self {
        KeyParam::Str(value.clone())
    }
}

impl From<Vec<i64>> for KeyParam {
    fn from(value: Vec<i64>) -> Self {
        KeyParam::Ids(value)
    }
}

impl From<&[i64]> for KeyParam {
    fn from(value: &[i64]) -> Self {
        KeyParam::Ids(value.to_vec())
    }
}

impl From<Vec<i32>> for KeyParam {
    fn from(value: Vec<i32>) -> Self {
        KeyParam::Ids(value.into_iter().map(i64::from).collect())
    }
}

impl From<Value> for KeyParam {
    fn from(value: Value) -> Self {
        KeyParam::Json(value)
    }
}

impl<T: Into<KeyParam>> From<Option<T>> for KeyParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(KeyParam::Null, Into::into)
    }
}

/// Builds a `Vec<KeyParam>` from heterogeneous values.
///
/// ```
/// use scoped_cache::{key_params, KeyParam};
///
/// let params = key_params![42, "x", None::<i32>];
/// assert_eq!(params[2], KeyParam::Null);
/// ```
#[macro_export]
macro_rules! key_params {
    () => {
        ::std::vec::Vec::<$crate::KeyParam>::new()
    };
    ($($param:expr),+ $(,)?) => {
        ::std::vec![$($crate::KeyParam::from($param)),+]
    };
}

// == Template Formatting ==
enum Missing {
    Fail,
    Truncate,
}

/// Substitutes `params` into `template`.
///
/// With `Missing::Truncate` rendering stops at the first placeholder that has
/// no parameter, so the output is a prefix of every full rendering.
fn format_template(template: &str, params: &[KeyParam], missing: Missing) -> Result<String> {
    let malformed = |reason: &str| CacheError::MalformedTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len() + params.len() * 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(malformed("unmatched '}'")),
            '{' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(_) => return Err(malformed("placeholder must be a parameter index")),
                        None => return Err(malformed("unterminated placeholder")),
                    }
                }
                let index: usize = digits
                    .parse()
                    .map_err(|_| malformed("placeholder must be a parameter index"))?;

                match (params.get(index), &missing) {
                    (Some(param), _) => param.render_into(&mut out),
                    (None, Missing::Truncate) => return Ok(out),
                    (None, Missing::Fail) => {
                        return Err(CacheError::MissingParameter {
                            template: template.to_string(),
                            index,
                            supplied: params.len(),
                        })
                    }
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

// == Resolve ==
/// Resolves `template` with `params` into a concrete cache key.
///
/// Without parameters the template is the key itself, braces included.
/// Otherwise every placeholder needs a parameter; surplus parameters are
/// ignored.
pub fn resolve(template: &str, params: &[KeyParam]) -> Result<String> {
    if template.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    if params.is_empty() {
        return Ok(template.to_string());
    }
    format_template(template, params, Missing::Fail)
}

// == Resolve Prefix ==
/// Resolves a key prefix for bulk eviction.
///
/// Without parameters the template is returned verbatim. Otherwise the
/// template is rendered up to the first placeholder lacking a parameter, so
/// `resolve_prefix(t, &p[..k])` is always a string prefix of `resolve(t, p)`.
pub fn resolve_prefix(template: &str, params: &[KeyParam]) -> Result<String> {
    if template.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    if params.is_empty() {
        return Ok(template.to_string());
    }
    format_template(template, params, Missing::Truncate)
}

// == Cache Key ==
/// Key template plus the prefix templates of the families it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    template: String,
    prefixes: Vec<String>,
}

impl CacheKey {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            prefixes: Vec::new(),
        }
    }

    /// Adds an invalidation family this key belongs to.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Resolves the key and all of its prefixes with the same parameters.
    pub fn create(&self, params: &[KeyParam]) -> Result<ResolvedKey> {
        let key = resolve(&self.template, params)?;
        let prefixes = self
            .prefixes
            .iter()
            .map(|prefix| resolve_prefix(prefix, params))
            .collect::<Result<Vec<_>>>()?;
        Ok(ResolvedKey { key, prefixes })
    }
}

/// Concrete key produced by [`CacheKey::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: String,
    pub prefixes: Vec<String>,
}
