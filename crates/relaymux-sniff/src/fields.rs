//! Header field collection

use crate::error::SniffError;
use std::collections::HashMap;

/// Accumulates `name: value` pairs from parsed header lines.
///
/// Header names must be unique (ASCII case-insensitive): a repeated name is
/// a protocol violation, never silently merged or overwritten. Downstream
/// would otherwise see ambiguous header semantics.
#[derive(Debug, Default)]
pub struct FieldMap {
    // Keyed by lower-cased name; the casing as received is kept alongside
    // the value.
    fields: HashMap<String, (String, String)>,
    complete: bool,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one header field, refusing a name already present.
    pub fn insert(&mut self, name: &str, value: &str) -> Result<(), SniffError> {
        let key = name.to_ascii_lowercase();
        if self.fields.contains_key(&key) {
            return Err(SniffError::DuplicateHeader(name.to_string()));
        }

        self.fields
            .insert(key, (name.to_string(), value.to_string()));
        Ok(())
    }

    /// Case-insensitive lookup by header name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Toggled once the header-terminator line is observed.
    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
