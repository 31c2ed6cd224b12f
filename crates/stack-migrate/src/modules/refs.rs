//! Rewriting of cross-module references through uid maps.
//!
//! A reference whose old uid has no mapping is left untouched and logged;
//! a single unresolved reference never fails the item.

use serde_json::Value;
use tracing::warn;

use crate::mapper::UidMap;

/// Rewrites references to one module's entities.
#[derive(Debug)]
pub struct ReferenceRewriter<'a> {
    target: &'a str,
    map: &'a UidMap,
    rewritten: usize,
    unresolved: Vec<String>,
}

impl<'a> ReferenceRewriter<'a> {
    /// Rewriter for references into `target` (a module name) using `map`.
    #[must_use]
    pub fn new(target: &'a str, map: &'a UidMap) -> Self {
        Self {
            target,
            map,
            rewritten: 0,
            unresolved: Vec::new(),
        }
    }

    /// Rewrites a single string value in place.
    ///
    /// Non-string values are ignored.
    pub fn rewrite(&mut self, value: &mut Value) {
        let Some(old) = value.as_str() else {
            return;
        };
        match self.map.get(old) {
            Some(new) => {
                *value = Value::String(new.to_string());
                self.rewritten += 1;
            }
            None => {
                warn!(
                    target_module = self.target,
                    uid = old,
                    "no mapping found, keeping original reference"
                );
                self.unresolved.push(old.to_string());
            }
        }
    }

    /// Rewrites a string, or every string of an array.
    pub fn rewrite_each(&mut self, value: &mut Value) {
        match value {
            Value::Array(items) => items.iter_mut().for_each(|item| self.rewrite(item)),
            other => self.rewrite(other),
        }
    }

    /// Rewrites the value at a JSON pointer (e.g. `/live_preview/default-env`)
    /// if present.
    pub fn rewrite_pointer(&mut self, doc: &mut Value, pointer: &str) {
        if let Some(value) = doc.pointer_mut(pointer) {
            self.rewrite_each(value);
        }
    }

    /// Number of references rewritten so far.
    #[must_use]
    pub fn rewritten(&self) -> usize {
        self.rewritten
    }

    /// Old uids that had no mapping.
    #[must_use]
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }
}

/// Rewrites `pointer` in `doc` when `map` is available.
///
/// Returns the unresolved uids.
pub fn rewrite_optional(
    doc: &mut Value,
    pointer: &str,
    target: &str,
    map: Option<&UidMap>,
) -> Vec<String> {
    match map {
        Some(map) => {
            let mut rewriter = ReferenceRewriter::new(target, map);
            rewriter.rewrite_pointer(doc, pointer);
            rewriter.unresolved
        }
        None => Vec::new(),
    }
}

/// Replaces every string equal to a mapped uid, anywhere in `doc`.
///
/// Used for asset references inside entries, where the field layout is
/// not known; strings that are not mapped are left alone silently.
pub fn replace_mapped_strings(doc: &mut Value, map: &UidMap) -> usize {
    match doc {
        Value::String(s) => match map.get(s) {
            Some(new) => {
                *s = new.to_string();
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(|v| replace_mapped_strings(v, map)).sum(),
        Value::Object(fields) => fields
            .values_mut()
            .map(|v| replace_mapped_strings(v, map))
            .sum(),
        _ => 0,
    }
}

/// Replaces occurrences of mapped urls inside every string of `doc`
/// (file fields and rich text bodies).
pub fn replace_urls(doc: &mut Value, urls: &UidMap) {
    if urls.is_empty() {
        return;
    }
    match doc {
        Value::String(s) => {
            for (old, new) in urls.iter() {
                if s.contains(old) {
                    *s = s.replace(old, new);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| replace_urls(v, urls)),
        Value::Object(fields) => fields.values_mut().for_each(|v| replace_urls(v, urls)),
        _ => {}
    }
}

/// True for an entry reference object (`{uid, _content_type_uid}`).
#[must_use]
pub fn is_entry_reference(value: &Value) -> bool {
    value.get("_content_type_uid").is_some() && value.get("uid").is_some()
}

/// Removes entry references from `doc`; returns whether any were found.
pub fn strip_entry_references(doc: &mut Value) -> bool {
    match doc {
        Value::Array(items) => {
            let before = items.len();
            items.retain(|item| !is_entry_reference(item));
            let mut found = items.len() != before;
            for item in items.iter_mut() {
                found |= strip_entry_references(item);
            }
            found
        }
        Value::Object(fields) => fields
            .values_mut()
            .fold(false, |found, v| strip_entry_references(v) | found),
        _ => false,
    }
}

/// Rewrites the `uid` of every entry reference in `doc`.
pub fn rewrite_entry_references(doc: &mut Value, rewriter: &mut ReferenceRewriter<'_>) {
    match doc {
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| rewrite_entry_references(item, rewriter)),
        Value::Object(fields) => {
            if fields.contains_key("_content_type_uid") {
                if let Some(uid) = fields.get_mut("uid") {
                    rewriter.rewrite(uid);
                }
                return;
            }
            fields
                .values_mut()
                .for_each(|v| rewrite_entry_references(v, rewriter));
        }
        _ => {}
    }
}
