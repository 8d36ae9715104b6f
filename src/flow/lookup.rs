// SPDX-License-Identifier: MIT

//! Interned string table for node field values
//!
//! Field records may store an integer id instead of a long string; the
//! resolver turns those ids back into text through this table.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct StringLookup {
    strings: Vec<String>,
    index: HashMap<String, u64>,
}

impl StringLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from its strings in id order
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lookup = Self::new();
        for s in strings {
            let s: String = s.into();
            // Keep ids positional even if a saved table repeats a string
            lookup.index.entry(s.clone()).or_insert(lookup.strings.len() as u64);
            lookup.strings.push(s);
        }
        lookup
    }

    /// Interned strings, indexed by id
    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Intern a string, returning its id (existing id if already present)
    pub fn intern(&mut self, s: &str) -> u64 {
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = self.strings.len() as u64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), id);
        id
    }

    pub fn get(&self, id: u64) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Text of a scalar field value, resolving integer ids through the table
    pub fn resolve(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => match n.as_u64().and_then(|id| self.get(id)) {
                Some(s) => s.to_string(),
                None => n.to_string(),
            },
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intern_is_stable() {
        let mut lookup = StringLookup::new();
        let a = lookup.intern("alpha");
        let b = lookup.intern("beta");
        assert_ne!(a, b);
        assert_eq!(lookup.intern("alpha"), a);
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.get(b), Some("beta"));
    }

    #[test]
    fn test_from_strings_keeps_ids() {
        let mut lookup = StringLookup::new();
        lookup.intern("alpha");
        let beta = lookup.intern("beta");

        let mut rebuilt = StringLookup::from_strings(lookup.strings().iter().cloned());
        assert_eq!(rebuilt.get(beta), Some("beta"));
        assert_eq!(rebuilt.intern("alpha"), 0);
        assert_eq!(rebuilt.intern("gamma"), 2);
    }

    #[test]
    fn test_resolve_values() {
        let mut lookup = StringLookup::new();
        let id = lookup.intern("a long field value");

        assert_eq!(lookup.resolve(&json!(id)), "a long field value");
        assert_eq!(lookup.resolve(&json!("literal")), "literal");
        // Unknown ids fall back to the number itself
        assert_eq!(lookup.resolve(&json!(99)), "99");
        assert_eq!(lookup.resolve(&json!(1.5)), "1.5");
        assert_eq!(lookup.resolve(&Value::Null), "");
    }
}
