//! Attribute-driven redaction for structured log payloads
//!
//! Payload types declare a static shape (field names plus redaction
//! markers) through [`Destructure`]. The [`PolicyResolver`] turns that shape
//! into a cached [`PolicyTable`] once per type, and the [`Redactor`] walks
//! runtime values against those tables to build a [`RedactedValue`] tree.
//!
//! ```text
//! TypeDescriptor ──resolve──▶ PolicyTable (cached per TypeId)
//!                                  │
//! payload value ──────redact───────┴──▶ RedactedValue
//! ```
//!
//! ## Markers
//!
//! - `#[not_logged]`: the field never appears in the logged representation
//! - `#[log_masked(preserve_length)]`: every character becomes `*`
//! - `#[log_masked]`: the value is replaced by `***`

pub mod descriptor;
pub mod destructure;
pub mod policy;

pub use descriptor::{
    Destructure, FieldDescriptor, FieldVisitor, Redaction, ToValue, TypeDescriptor, Value,
};
pub use destructure::{
    destructure_raw, mask, redact, RedactedValue, Redactor, Scalar, CYCLE_SENTINEL, MASK_CHAR,
    MASK_TEXT,
};
pub use policy::{FieldPolicy, PolicyResolver, PolicyTable};
