//! Field policies and the per-type policy resolver

use dashmap::DashMap;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use super::descriptor::{Destructure, Redaction, TypeDescriptor};
use crate::error::TelemetryError;

/// Redaction policy applied to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldPolicy {
    PassThrough,
    Exclude,
    Mask { preserve_length: bool },
}

impl From<Redaction> for FieldPolicy {
    fn from(marker: Redaction) -> Self {
        match marker {
            Redaction::NotLogged => FieldPolicy::Exclude,
            Redaction::LogMasked { preserve_length } => FieldPolicy::Mask { preserve_length },
        }
    }
}

/// Field policies of one payload type, in declared field order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    type_name: &'static str,
    entries: Vec<(&'static str, FieldPolicy)>,
}

impl PolicyTable {
    /// Build the table from a type descriptor
    ///
    /// A field carrying two different markers, or a field name declared twice,
    /// is rejected with `InvalidPolicy`. Repeating the same marker is harmless.
    pub fn from_descriptor(descriptor: &TypeDescriptor) -> Result<Self, TelemetryError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(descriptor.fields.len());

        for field in &descriptor.fields {
            if !seen.insert(field.name) {
                return Err(TelemetryError::InvalidPolicy {
                    type_name: descriptor.type_name.to_string(),
                    field: field.name.to_string(),
                    reason: "field declared more than once".to_string(),
                });
            }

            let mut markers: Vec<Redaction> = Vec::new();
            for marker in &field.annotations {
                if !markers.contains(marker) {
                    markers.push(*marker);
                }
            }

            let policy = match markers.as_slice() {
                [] => FieldPolicy::PassThrough,
                [marker] => FieldPolicy::from(*marker),
                _ => {
                    return Err(TelemetryError::InvalidPolicy {
                        type_name: descriptor.type_name.to_string(),
                        field: field.name.to_string(),
                        reason: format!("conflicting redaction markers {:?}", markers),
                    })
                }
            };

            entries.push((field.name, policy));
        }

        Ok(Self {
            type_name: descriptor.type_name,
            entries,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Policy for a field; fields absent from the table pass through
    pub fn policy_for(&self, field: &str) -> FieldPolicy {
        self.entries
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, policy)| *policy)
            .unwrap_or(FieldPolicy::PassThrough)
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| *name == field)
    }

    pub fn entries(&self) -> &[(&'static str, FieldPolicy)] {
        &self.entries
    }
}

/// Computes and caches per-type policy tables
///
/// The table for a type is computed at most once per successful resolution
/// and shared by every caller afterwards. Failed resolutions are not cached,
/// so the same error is reported again on the next attempt.
#[derive(Debug, Default)]
pub struct PolicyResolver {
    cache: DashMap<TypeId, Arc<PolicyTable>>,
}

impl PolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, value: &dyn Destructure) -> Result<Arc<PolicyTable>, TelemetryError> {
        self.resolve_with(value.type_key(), || value.descriptor())
    }

    pub fn resolve_with<F>(&self, key: TypeId, describe: F) -> Result<Arc<PolicyTable>, TelemetryError>
    where
        F: FnOnce() -> TypeDescriptor,
    {
        if let Some(table) = self.cache.get(&key) {
            return Ok(Arc::clone(table.value()));
        }

        let table = Arc::new(PolicyTable::from_descriptor(&describe())?);

        // Two racing builders produce equal tables; the first one published wins.
        let published = self.cache.entry(key).or_insert(table);
        Ok(Arc::clone(published.value()))
    }

    pub fn cached_types(&self) -> usize {
        self.cache.len()
    }
}
