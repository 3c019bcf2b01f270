//! Resilient record store
//!
//! Converts between the persisted YAML representation and the record
//! types in [`crate::models`]. The persisted form is never trusted to be
//! well-typed: every field goes through a [`Fields`] reader that either
//! substitutes a documented default ([`ParseMode::Fix`]) or rejects the
//! whole record ([`ParseMode::Strict`]).
//!
//! Fix mode only ever invents scalar defaults (empty string, zero, empty
//! list). It never makes up identifiers, trace links or revision entries.

mod records;
pub mod legacy;

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

pub use legacy::{
    is_legacy_project, migrate_legacy_project, pending_document_count, retry_pending_documents,
    MigrationReport,
};

/// Validation policy applied while parsing a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Repair malformed fields with defaults and continue
    #[default]
    Fix,
    /// Reject the record on the first malformed field
    Strict,
}

/// Strict-mode validation failure, naming the offending field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field}': {reason}")]
pub struct Invalid {
    pub field: String,
    pub reason: String,
}

impl Invalid {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A type that round-trips through the persisted representation
///
/// For every valid value `r`: `R::parse(&r.serialize()?, ParseMode::Strict) == Ok(r)`.
pub trait Record: Sized + Serialize {
    /// Parses a raw value. In [`ParseMode::Fix`] this never returns `Err`.
    fn parse(raw: &Value, mode: ParseMode) -> Result<Self, Invalid>;

    /// Converts the record into its persisted representation
    fn serialize(&self) -> Result<Value, serde_yaml::Error> {
        serde_yaml::to_value(self)
    }
}

/// Wraps a bare value into a one-element sequence; the persisted form may
/// collapse singleton arrays.
pub fn rehomogenize(value: &Value) -> Vec<&Value> {
    match value {
        Value::Sequence(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Field reader over one mapping, applying the parse mode to every access
pub(crate) struct Fields<'a> {
    map: Option<&'a Mapping>,
    mode: ParseMode,
    path: String,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(raw: &'a Value, mode: ParseMode, path: &str) -> Result<Self, Invalid> {
        let map = match raw {
            Value::Mapping(m) => Some(m),
            _ if mode == ParseMode::Strict => {
                return Err(Invalid::new(path, "expected a mapping"));
            }
            _ => {
                log::warn!("{}: not a mapping, using defaults", display_path(path));
                None
            }
        };
        Ok(Self {
            map,
            mode,
            path: path.to_string(),
        })
    }

    pub(crate) fn mode(&self) -> ParseMode {
        self.mode
    }

    pub(crate) fn path_of(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.path, name)
        }
    }

    pub(crate) fn raw(&self, name: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(name))
    }

    /// Strict: error. Fix: log and hand back the default.
    pub(crate) fn repair<T>(&self, name: &str, reason: &str, default: T) -> Result<T, Invalid> {
        match self.mode {
            ParseMode::Strict => Err(Invalid::new(self.path_of(name), reason)),
            ParseMode::Fix => {
                log::warn!("{}: {}, using default", self.path_of(name), reason);
                Ok(default)
            }
        }
    }

    fn scalar<T>(
        &self,
        name: &str,
        expected: &str,
        default: T,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<T, Invalid> {
        match self.raw(name) {
            None => self.repair(name, "missing", default),
            Some(value) => match convert(value) {
                Some(v) => Ok(v),
                None => self.repair(name, &format!("expected {}", expected), default),
            },
        }
    }

    pub(crate) fn string(&self, name: &str) -> Result<String, Invalid> {
        self.string_or(name, String::new())
    }

    pub(crate) fn string_or(&self, name: &str, default: String) -> Result<String, Invalid> {
        let mode = self.mode;
        self.scalar(name, "a string", default, |v| match v {
            Value::String(s) => Some(s.clone()),
            // Hand-edited files often lose the quotes around numeric text
            Value::Number(n) if mode == ParseMode::Fix => Some(n.to_string()),
            Value::Bool(b) if mode == ParseMode::Fix => Some(b.to_string()),
            _ => None,
        })
    }

    pub(crate) fn u64_or(&self, name: &str, default: u64) -> Result<u64, Invalid> {
        let mode = self.mode;
        self.scalar(name, "an unsigned integer", default, |v| as_u64(v, mode))
    }

    pub(crate) fn u32_or(&self, name: &str, default: u32) -> Result<u32, Invalid> {
        let mode = self.mode;
        self.scalar(name, "an unsigned integer", default, |v| {
            as_u64(v, mode).and_then(|n| u32::try_from(n).ok())
        })
    }

    pub(crate) fn i32_or(&self, name: &str, default: i32) -> Result<i32, Invalid> {
        self.scalar(name, "an integer", default, |v| {
            v.as_i64().and_then(|n| i32::try_from(n).ok())
        })
    }

    /// Nullable identifier; absent and null both mean "none"
    pub(crate) fn opt_id(&self, name: &str) -> Result<Option<u64>, Invalid> {
        match self.raw(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match as_u64(value, self.mode) {
                Some(id) => Ok(Some(id)),
                None => self.repair(name, "expected an identifier or null", None),
            },
        }
    }

    /// Parses an enumerated value from its string form
    pub(crate) fn parsed<T>(
        &self,
        name: &str,
        default: T,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, Invalid> {
        match self.raw(name) {
            None => self.repair(name, "missing", default),
            Some(Value::String(s)) => match parse(s) {
                Some(v) => Ok(v),
                None => self.repair(name, &format!("unknown value '{}'", s), default),
            },
            Some(_) => self.repair(name, "expected a string", default),
        }
    }

    /// Sequence field, re-wrapping a collapsed singleton
    pub(crate) fn items(&self, name: &str) -> Result<Vec<&'a Value>, Invalid> {
        match self.raw(name) {
            None => self.repair(name, "missing", Vec::new()),
            Some(value) => Ok(rehomogenize(value)),
        }
    }

    /// Identifier list. Fix mode drops unreadable entries rather than guessing.
    pub(crate) fn id_list(&self, name: &str) -> Result<Vec<u64>, Invalid> {
        let mut ids = Vec::new();
        for (i, item) in self.items(name)?.into_iter().enumerate() {
            match as_u64(item, self.mode) {
                Some(id) => ids.push(id),
                None => {
                    self.repair(&format!("{}[{}]", name, i), "expected an identifier", ())?;
                }
            }
        }
        Ok(ids)
    }

    pub(crate) fn string_list(&self, name: &str) -> Result<Vec<String>, Invalid> {
        let mut out = Vec::new();
        for (i, item) in self.items(name)?.into_iter().enumerate() {
            match item {
                Value::String(s) => out.push(s.clone()),
                Value::Number(n) if self.mode == ParseMode::Fix => out.push(n.to_string()),
                _ => {
                    self.repair(&format!("{}[{}]", name, i), "expected a string", ())?;
                }
            }
        }
        Ok(out)
    }

    /// Nested mapping; missing is repaired to an empty mapping in Fix mode
    pub(crate) fn nested(&self, name: &str) -> Result<&'a Value, Invalid> {
        static EMPTY: Value = Value::Null;
        match self.raw(name) {
            Some(value) => Ok(value),
            None => self.repair(name, "missing", &EMPTY),
        }
    }
}

fn as_u64(value: &Value, mode: ParseMode) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if mode == ParseMode::Fix => s.trim().parse().ok(),
        _ => None,
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<record>"
    } else {
        path
    }
}

/// Parses YAML text into a raw value; syntax errors are Strict failures
pub fn parse_text<R: Record>(text: &str, mode: ParseMode) -> Result<R, Invalid> {
    let raw = match serde_yaml::from_str::<Value>(text) {
        Ok(raw) => raw,
        Err(e) if mode == ParseMode::Strict => {
            return Err(Invalid::new("<document>", e.to_string()));
        }
        Err(e) => {
            log::warn!("Unparseable record text ({}), using defaults", e);
            Value::Null
        }
    };
    R::parse(&raw, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_rehomogenize_wraps_singletons() {
        assert_eq!(rehomogenize(&yaml("7")).len(), 1);
        assert_eq!(rehomogenize(&yaml("[1, 2]")).len(), 2);
        assert!(rehomogenize(&Value::Null).is_empty());
    }

    #[test]
    fn test_fields_strict_rejects_missing() {
        let raw = yaml("name: x");
        let fields = Fields::new(&raw, ParseMode::Strict, "doc").unwrap();
        assert_eq!(fields.string("name").unwrap(), "x");
        let err = fields.u64_or("id", 0).unwrap_err();
        assert_eq!(err.field, "doc.id");
    }

    #[test]
    fn test_fields_fix_repairs() {
        let raw = yaml("id: '12'\nids: [1, bogus, 3]\nname: 5");
        let fields = Fields::new(&raw, ParseMode::Fix, "").unwrap();
        assert_eq!(fields.u64_or("id", 0).unwrap(), 12);
        assert_eq!(fields.id_list("ids").unwrap(), vec![1, 3]);
        assert_eq!(fields.string("name").unwrap(), "5");
        assert_eq!(fields.u32_or("missing", 9).unwrap(), 9);
    }

    #[test]
    fn test_fields_singleton_id_list() {
        let raw = yaml("children: 42");
        let fields = Fields::new(&raw, ParseMode::Strict, "").unwrap();
        assert_eq!(fields.id_list("children").unwrap(), vec![42]);
    }

    #[test]
    fn test_non_mapping_is_invalid_only_in_strict() {
        let raw = yaml("[1, 2]");
        assert!(Fields::new(&raw, ParseMode::Strict, "").is_err());
        assert!(Fields::new(&raw, ParseMode::Fix, "").is_ok());
    }
}
