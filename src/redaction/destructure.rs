//! Redacting and raw destructuring into [`RedactedValue`] trees

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;

use super::descriptor::{Destructure, FieldVisitor, ToValue, Value};
use super::policy::{FieldPolicy, PolicyResolver, PolicyTable};
use crate::error::TelemetryError;

/// Character used for length-preserving masks
pub const MASK_CHAR: char = '*';

/// Fixed replacement for masks that do not preserve length
pub const MASK_TEXT: &str = "***";

/// Rendered in place of a record that is already being destructured higher up
pub const CYCLE_SENTINEL: &str = "<cycle>";

/// Leaf of a destructured tree
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
}

impl Scalar {
    fn from_value(value: &Value<'_>) -> Option<Self> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(v) => Some(Scalar::Bool(*v)),
            Value::I64(v) => Some(Scalar::I64(*v)),
            Value::U64(v) => Some(Scalar::U64(*v)),
            Value::F64(v) => Some(Scalar::F64(*v)),
            Value::Str(v) => Some(Scalar::Str(v.to_string())),
            Value::Seq(_) | Value::Record(_) => None,
        }
    }
}

/// Canonical textual form, used as the input of masking
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::I64(v) => write!(f, "{}", v),
            Scalar::U64(v) => write!(f, "{}", v),
            Scalar::F64(v) => write!(f, "{}", v),
            Scalar::Str(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_unit(),
            Scalar::Bool(v) => serializer.serialize_bool(*v),
            Scalar::I64(v) => serializer.serialize_i64(*v),
            Scalar::U64(v) => serializer.serialize_u64(*v),
            Scalar::F64(v) => serializer.serialize_f64(*v),
            Scalar::Str(v) => serializer.serialize_str(v),
        }
    }
}

/// Redacted structured representation of a log payload
#[derive(Debug, Clone, PartialEq)]
pub enum RedactedValue {
    Scalar(Scalar),
    Sequence(Vec<RedactedValue>),
    /// Named fields in output order
    Record(Vec<(String, RedactedValue)>),
}

impl RedactedValue {
    pub fn null() -> Self {
        RedactedValue::Scalar(Scalar::Null)
    }

    /// Field of a record, if present
    pub fn get(&self, name: &str) -> Option<&RedactedValue> {
        match self {
            RedactedValue::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RedactedValue::Scalar(Scalar::Str(text)) => Some(text),
            _ => None,
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        match self {
            RedactedValue::Record(fields) => fields.iter().map(|(name, _)| name.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// True if a field with this name appears anywhere in the tree
    pub fn contains_field(&self, name: &str) -> bool {
        match self {
            RedactedValue::Scalar(_) => false,
            RedactedValue::Sequence(items) => items.iter().any(|item| item.contains_field(name)),
            RedactedValue::Record(fields) => fields
                .iter()
                .any(|(field, value)| field == name || value.contains_field(name)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for RedactedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RedactedValue::Scalar(scalar) => scalar.serialize(serializer),
            RedactedValue::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            RedactedValue::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }
    }
}

/// Human-readable rendering: strings quoted, records as `{ Name: value }`
impl fmt::Display for RedactedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedactedValue::Scalar(Scalar::Str(text)) => write!(f, "{:?}", text),
            RedactedValue::Scalar(scalar) => write!(f, "{}", scalar),
            RedactedValue::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            RedactedValue::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", name, value)?;
                }
                write!(f, " }}")
            }
        }
    }
}

impl From<Scalar> for RedactedValue {
    fn from(scalar: Scalar) -> Self {
        RedactedValue::Scalar(scalar)
    }
}

impl From<&str> for RedactedValue {
    fn from(text: &str) -> Self {
        RedactedValue::Scalar(Scalar::Str(text.to_string()))
    }
}

impl From<String> for RedactedValue {
    fn from(text: String) -> Self {
        RedactedValue::Scalar(Scalar::Str(text))
    }
}

impl From<bool> for RedactedValue {
    fn from(value: bool) -> Self {
        RedactedValue::Scalar(Scalar::Bool(value))
    }
}

impl From<i64> for RedactedValue {
    fn from(value: i64) -> Self {
        RedactedValue::Scalar(Scalar::I64(value))
    }
}

impl From<u64> for RedactedValue {
    fn from(value: u64) -> Self {
        RedactedValue::Scalar(Scalar::U64(value))
    }
}

impl From<f64> for RedactedValue {
    fn from(value: f64) -> Self {
        RedactedValue::Scalar(Scalar::F64(value))
    }
}

/// Mask a canonical string form
pub fn mask(text: &str, preserve_length: bool) -> String {
    if preserve_length {
        std::iter::repeat(MASK_CHAR)
            .take(text.chars().count())
            .collect()
    } else {
        MASK_TEXT.to_string()
    }
}

fn mask_value(value: &Value<'_>, preserve_length: bool) -> RedactedValue {
    match value {
        Value::Null => RedactedValue::null(),
        Value::Seq(items) => RedactedValue::Sequence(
            items
                .iter()
                .map(|item| mask_value(item, preserve_length))
                .collect(),
        ),
        Value::Record(_) => RedactedValue::from(MASK_TEXT),
        scalar => {
            let text = Scalar::from_value(scalar)
                .map(|s| s.to_string())
                .unwrap_or_default();
            RedactedValue::from(mask(&text, preserve_length))
        }
    }
}

/// Walks a value graph and produces its redacted tree
///
/// Without a resolver every field passes through. The guard tracks the
/// records on the current path only, so a record shared by two siblings is
/// rendered twice while a back-reference to an ancestor becomes
/// [`CYCLE_SENTINEL`].
pub struct Redactor<'r> {
    resolver: Option<&'r PolicyResolver>,
    path: HashSet<(usize, TypeId)>,
}

impl<'r> Redactor<'r> {
    pub fn filtered(resolver: &'r PolicyResolver) -> Self {
        Self {
            resolver: Some(resolver),
            path: HashSet::new(),
        }
    }

    pub fn raw() -> Self {
        Self {
            resolver: None,
            path: HashSet::new(),
        }
    }

    pub fn redact(&mut self, value: &Value<'_>) -> Result<RedactedValue, TelemetryError> {
        match value {
            Value::Seq(items) => items
                .iter()
                .map(|item| self.redact(item))
                .collect::<Result<Vec<_>, _>>()
                .map(RedactedValue::Sequence),
            Value::Record(record) => self.redact_record(*record),
            scalar => Ok(Scalar::from_value(scalar)
                .map(RedactedValue::Scalar)
                .unwrap_or_else(RedactedValue::null)),
        }
    }

    fn redact_record(&mut self, record: &dyn Destructure) -> Result<RedactedValue, TelemetryError> {
        // A record at offset zero shares its address with its first field.
        let key = (
            record as *const dyn Destructure as *const () as usize,
            record.type_key(),
        );
        if !self.path.insert(key) {
            return Ok(RedactedValue::from(CYCLE_SENTINEL));
        }

        let result = self.collect_fields(record);
        self.path.remove(&key);
        result
    }

    fn collect_fields(&mut self, record: &dyn Destructure) -> Result<RedactedValue, TelemetryError> {
        let table = match self.resolver {
            Some(resolver) => Some(resolver.resolve(record)?),
            None => None,
        };

        let slot_count = table.as_ref().map(|t| t.entries().len()).unwrap_or(0);
        let mut collector = RecordCollector {
            redactor: self,
            table: table.as_deref(),
            slots: (0..slot_count).map(|_| None).collect(),
            extra: Vec::new(),
            error: None,
        };
        record.visit_fields(&mut collector);

        if let Some(err) = collector.error {
            return Err(err);
        }

        let fields = collector
            .slots
            .into_iter()
            .flatten()
            .chain(collector.extra)
            .collect();
        Ok(RedactedValue::Record(fields))
    }
}

struct RecordCollector<'a, 'r> {
    redactor: &'a mut Redactor<'r>,
    table: Option<&'a PolicyTable>,
    slots: Vec<Option<(String, RedactedValue)>>,
    extra: Vec<(String, RedactedValue)>,
    error: Option<TelemetryError>,
}

impl FieldVisitor for RecordCollector<'_, '_> {
    fn visit(&mut self, name: &'static str, value: Value<'_>) {
        if self.error.is_some() {
            return;
        }

        let policy = self
            .table
            .map(|table| table.policy_for(name))
            .unwrap_or(FieldPolicy::PassThrough);

        let redacted = match policy {
            FieldPolicy::Exclude => return,
            FieldPolicy::Mask { preserve_length } => mask_value(&value, preserve_length),
            FieldPolicy::PassThrough => match self.redactor.redact(&value) {
                Ok(redacted) => redacted,
                Err(err) => {
                    self.error = Some(err);
                    return;
                }
            },
        };

        let position = self.table.and_then(|table| table.position(name));
        match position {
            Some(index) if self.slots[index].is_none() => {
                self.slots[index] = Some((name.to_string(), redacted));
            }
            _ => self.extra.push((name.to_string(), redacted)),
        }
    }
}

/// Redact a payload using the policy tables of its types
pub fn redact(value: &dyn ToValue, resolver: &PolicyResolver) -> Result<RedactedValue, TelemetryError> {
    Redactor::filtered(resolver).redact(&value.to_value())
}

/// Destructure a payload with every field passed through verbatim
pub fn destructure_raw(value: &dyn ToValue) -> RedactedValue {
    // Without a resolver no policy is consulted, so no error can arise.
    Redactor::raw()
        .redact(&value.to_value())
        .unwrap_or_else(|_| RedactedValue::null())
}
