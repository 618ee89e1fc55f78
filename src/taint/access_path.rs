//! Access paths: the "where" of a taint.
//!
//! An access path is a base value plus an ordered field chain, with flags for
//! sub-field tainting and array taint. The empty access path (no base) stands
//! for a pure control taint introduced by the implicit-flow rule.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::program::{FieldId, Value};

/// Which aspect of an array a taint covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArrayTaintType {
    #[default]
    None,
    Contents,
    Length,
    ContentsAndLength,
}

impl ArrayTaintType {
    pub fn covers_contents(self) -> bool {
        matches!(self, ArrayTaintType::Contents | ArrayTaintType::ContentsAndLength)
    }

    pub fn covers_length(self) -> bool {
        matches!(self, ArrayTaintType::Length | ArrayTaintType::ContentsAndLength)
    }
}

/// A memory location: base value plus field chain.
///
/// Equality and hashing cover all fields; access paths are the identity-giving
/// part of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPath {
    base: Option<Value>,
    fields: Vec<FieldId>,
    taint_sub_fields: bool,
    array_taint: ArrayTaintType,
}

impl AccessPath {
    /// The empty access path: a control taint with no storage location.
    pub fn empty() -> Self {
        Self {
            base: None,
            fields: Vec::new(),
            taint_sub_fields: false,
            array_taint: ArrayTaintType::None,
        }
    }

    pub fn for_value(base: Value) -> Self {
        debug_assert!(base.is_taintable());
        Self {
            base: Some(base),
            fields: Vec::new(),
            taint_sub_fields: false,
            array_taint: ArrayTaintType::None,
        }
    }

    /// Builds a path with a field chain, truncating at `max_len` fields. A
    /// truncated path loses precision by tainting all sub-fields instead.
    pub fn with_fields(base: Value, fields: Vec<FieldId>, max_len: usize) -> Self {
        let mut ap = Self::for_value(base);
        if fields.len() > max_len {
            ap.fields = fields.into_iter().take(max_len).collect();
            ap.taint_sub_fields = true;
        } else {
            ap.fields = fields;
        }
        ap
    }

    pub fn with_array_taint(mut self, array_taint: ArrayTaintType) -> Self {
        self.array_taint = array_taint;
        self
    }

    pub fn with_taint_sub_fields(mut self, taint_sub_fields: bool) -> Self {
        self.taint_sub_fields = taint_sub_fields;
        self
    }

    /// Replaces the base while keeping chain and flags. Used when mapping
    /// taints between caller and callee scopes.
    pub fn rebase(&self, new_base: Value) -> Self {
        debug_assert!(new_base.is_taintable());
        Self {
            base: Some(new_base),
            fields: self.fields.clone(),
            taint_sub_fields: self.taint_sub_fields,
            array_taint: self.array_taint,
        }
    }

    /// Appends a field, truncating at `max_len` as in [`Self::with_fields`].
    pub fn append_field(&self, field: FieldId, max_len: usize) -> Self {
        let mut fields = self.fields.clone();
        fields.push(field);
        let base = self.base.expect("cannot extend the empty access path");
        let mut ap = Self::with_fields(base, fields, max_len);
        ap.array_taint = self.array_taint;
        ap.taint_sub_fields |= self.taint_sub_fields;
        ap
    }

    pub fn base(&self) -> Option<Value> {
        self.base
    }

    /// The plain value of this path: its base, only when the path has no
    /// field chain. Sink matching works on plain values.
    pub fn plain_value(&self) -> Option<Value> {
        if self.fields.is_empty() {
            self.base
        } else {
            None
        }
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    pub fn is_local(&self) -> bool {
        matches!(self.base, Some(Value::Local(_))) && self.fields.is_empty()
    }

    pub fn is_static_field(&self) -> bool {
        matches!(self.base, Some(Value::StaticField(_)))
    }

    pub fn taint_sub_fields(&self) -> bool {
        self.taint_sub_fields
    }

    pub fn array_taint(&self) -> ArrayTaintType {
        self.array_taint
    }

    /// Whether this path is rooted at the given value.
    pub fn starts_with(&self, v: Value) -> bool {
        self.base == Some(v)
    }

    /// Whether a taint on this path covers a read of `v.field...`; either the
    /// exact field matches the head of the chain, or sub-field tainting is on.
    pub fn covers_field(&self, base: Value, field: FieldId) -> bool {
        if self.base != Some(base) {
            return false;
        }
        match self.fields.first() {
            Some(head) => *head == field,
            None => self.taint_sub_fields,
        }
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            None => write!(f, "<control>")?,
            Some(Value::Local(l)) => write!(f, "v{}", l.0)?,
            Some(Value::StaticField(sf)) => write!(f, "S.f{}", sf.0)?,
            Some(Value::Const) => write!(f, "<const>")?,
        }
        for field in &self.fields {
            write!(f, ".f{}", field.0)?;
        }
        if self.taint_sub_fields {
            write!(f, ".*")?;
        }
        match self.array_taint {
            ArrayTaintType::None => {}
            ArrayTaintType::Contents => write!(f, "[*]")?,
            ArrayTaintType::Length => write!(f, "[len]")?,
            ArrayTaintType::ContentsAndLength => write!(f, "[*,len]")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::LocalId;

    fn local(i: u32) -> Value {
        Value::Local(LocalId(i))
    }

    #[test]
    fn field_chain_truncates_at_cap() {
        let fields = vec![FieldId(0), FieldId(1), FieldId(2)];
        let ap = AccessPath::with_fields(local(0), fields, 2);
        assert_eq!(ap.fields().len(), 2);
        assert!(ap.taint_sub_fields());
    }

    #[test]
    fn plain_value_only_without_fields() {
        let ap = AccessPath::for_value(local(3));
        assert_eq!(ap.plain_value(), Some(local(3)));
        let with_field = ap.append_field(FieldId(0), 5);
        assert_eq!(with_field.plain_value(), None);
        assert_eq!(with_field.base(), Some(local(3)));
    }

    #[test]
    fn covers_field_respects_sub_field_flag() {
        let exact = AccessPath::with_fields(local(0), vec![FieldId(7)], 5);
        assert!(exact.covers_field(local(0), FieldId(7)));
        assert!(!exact.covers_field(local(0), FieldId(8)));

        let subs = AccessPath::for_value(local(0)).with_taint_sub_fields(true);
        assert!(subs.covers_field(local(0), FieldId(8)));
    }

    #[test]
    fn empty_path_is_control_taint() {
        let ap = AccessPath::empty();
        assert!(ap.is_empty());
        assert_eq!(ap.plain_value(), None);
        assert!(!ap.is_static_field());
    }
}
