//! Static shape descriptions and runtime field access for payload types

use std::any::TypeId;
use std::borrow::Cow;
use std::rc::Rc;
use std::sync::Arc;

/// Declarative redaction marker attached to a payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Redaction {
    /// Exclude the field from any logged representation
    NotLogged,
    /// Mask the field value
    LogMasked { preserve_length: bool },
}

/// A named field and the markers declared on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub annotations: Vec<Redaction>,
}

impl FieldDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            annotations: Vec::new(),
        }
    }

    pub fn with(mut self, marker: Redaction) -> Self {
        self.annotations.push(marker);
        self
    }
}

/// Static shape of a payload type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

/// Runtime value of a payload field
pub enum Value<'a> {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(Cow<'a, str>),
    Seq(Vec<Value<'a>>),
    Record(&'a dyn Destructure),
}

impl std::fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::I64(v) => write!(f, "I64({})", v),
            Value::U64(v) => write!(f, "U64({})", v),
            Value::F64(v) => write!(f, "F64({})", v),
            Value::Str(v) => write!(f, "Str({:?})", v),
            Value::Seq(items) => f.debug_tuple("Seq").field(items).finish(),
            Value::Record(record) => write!(f, "Record({})", record.descriptor().type_name),
        }
    }
}

/// Receives the runtime fields of a record, one call per field
pub trait FieldVisitor {
    fn visit(&mut self, name: &'static str, value: Value<'_>);
}

/// A structured payload type that can be destructured into a log tree
///
/// `descriptor` must depend on the type only, never on field values: the
/// resolved policy is cached per type and reused for every instance.
pub trait Destructure: 'static {
    fn descriptor(&self) -> TypeDescriptor;

    fn visit_fields(&self, visitor: &mut dyn FieldVisitor);

    fn type_key(&self) -> TypeId {
        TypeId::of::<Self>()
    }
}

/// Conversion of a field into a [`Value`]
pub trait ToValue {
    fn to_value(&self) -> Value<'_>;
}

impl ToValue for String {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Borrowed(self.as_str()))
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Borrowed(self))
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl ToValue for Cow<'_, str> {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Borrowed(self.as_ref()))
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Owned(self.to_string()))
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value<'_> {
        Value::Bool(*self)
    }
}

macro_rules! signed_to_value {
    ($($ty:ty),*) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value<'_> {
                    Value::I64(*self as i64)
                }
            }
        )*
    };
}

macro_rules! unsigned_to_value {
    ($($ty:ty),*) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value<'_> {
                    Value::U64(*self as u64)
                }
            }
        )*
    };
}

signed_to_value!(i8, i16, i32, i64, isize);
unsigned_to_value!(u8, u16, u32, u64, usize);

impl ToValue for f32 {
    fn to_value(&self) -> Value<'_> {
        Value::F64(f64::from(*self))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value<'_> {
        Value::F64(*self)
    }
}

impl ToValue for uuid::Uuid {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Owned(self.to_string()))
    }
}

impl ToValue for chrono::DateTime<chrono::Utc> {
    fn to_value(&self) -> Value<'_> {
        Value::Str(Cow::Owned(self.to_rfc3339()))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value<'_> {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value<'_> {
        Value::Seq(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value<'_> {
        self.as_slice().to_value()
    }
}

impl<T: ToValue + ?Sized> ToValue for Box<T> {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<T: ToValue + ?Sized> ToValue for Arc<T> {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

impl<T: ToValue + ?Sized> ToValue for Rc<T> {
    fn to_value(&self) -> Value<'_> {
        (**self).to_value()
    }
}

/// Implement [`Destructure`] and [`ToValue`] for a struct from a field list
///
/// Fields are listed in the order they should appear in the logged record.
/// Each field may carry `#[not_logged]`, `#[log_masked]` or
/// `#[log_masked(preserve_length)]`. Unannotated fields pass through.
///
/// Every field of the struct must be listed, so a field added later cannot
/// silently drop out of the logged record:
///
/// ```compile_fail
/// use pii_telemetry::destructure;
///
/// struct Order {
///     id: u64,
///     total: u64,
/// }
///
/// destructure!(Order { id });
/// ```
///
/// ```
/// use pii_telemetry::destructure;
///
/// struct Customer {
///     id: String,
///     name: String,
///     ssn: String,
/// }
///
/// destructure!(Customer {
///     id,
///     #[not_logged]
///     name,
///     #[log_masked(preserve_length)]
///     ssn,
/// });
/// ```
#[macro_export]
macro_rules! destructure {
    ($ty:ident { $( $(#[$($marker:tt)+])* $field:ident ),* $(,)? }) => {
        impl $crate::redaction::Destructure for $ty {
            fn descriptor(&self) -> $crate::redaction::TypeDescriptor {
                $crate::redaction::TypeDescriptor {
                    type_name: stringify!($ty),
                    fields: vec![
                        $(
                            $crate::redaction::FieldDescriptor {
                                name: stringify!($field),
                                annotations: vec![
                                    $( $crate::__redaction_marker!($($marker)+) ),*
                                ],
                            }
                        ),*
                    ],
                }
            }

            fn visit_fields(&self, visitor: &mut dyn $crate::redaction::FieldVisitor) {
                let $ty { $( $field: _ ),* } = self;
                $(
                    visitor.visit(
                        stringify!($field),
                        $crate::redaction::ToValue::to_value(&self.$field),
                    );
                )*
            }
        }

        impl $crate::redaction::ToValue for $ty {
            fn to_value(&self) -> $crate::redaction::Value<'_> {
                $crate::redaction::Value::Record(self)
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __redaction_marker {
    (not_logged) => {
        $crate::redaction::Redaction::NotLogged
    };
    (log_masked) => {
        $crate::redaction::Redaction::LogMasked {
            preserve_length: false,
        }
    };
    (log_masked(preserve_length)) => {
        $crate::redaction::Redaction::LogMasked {
            preserve_length: true,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Account {
        id: u32,
        owner: String,
        pin: String,
        tags: Vec<String>,
    }

    crate::destructure!(Account {
        id,
        #[not_logged]
        owner,
        #[log_masked(preserve_length)]
        pin,
        #[log_masked]
        tags,
    });

    struct FieldNames(Vec<&'static str>);

    impl FieldVisitor for FieldNames {
        fn visit(&mut self, name: &'static str, _value: Value<'_>) {
            self.0.push(name);
        }
    }

    fn sample() -> Account {
        Account {
            id: 7,
            owner: "alice".to_string(),
            pin: "1234".to_string(),
            tags: vec!["vip".to_string()],
        }
    }

    #[test]
    fn test_macro_descriptor() {
        let descriptor = sample().descriptor();

        assert_eq!(descriptor.type_name, "Account");
        assert_eq!(descriptor.fields.len(), 4);
        assert!(descriptor.fields[0].annotations.is_empty());
        assert_eq!(descriptor.fields[1].annotations, vec![Redaction::NotLogged]);
        assert_eq!(
            descriptor.fields[2].annotations,
            vec![Redaction::LogMasked {
                preserve_length: true
            }]
        );
        assert_eq!(
            descriptor.fields[3].annotations,
            vec![Redaction::LogMasked {
                preserve_length: false
            }]
        );
    }

    #[test]
    fn test_macro_visits_fields_in_declared_order() {
        let mut names = FieldNames(Vec::new());
        sample().visit_fields(&mut names);
        assert_eq!(names.0, vec!["id", "owner", "pin", "tags"]);
    }

    #[test]
    fn test_type_key_is_per_type() {
        let a = sample();
        let b = sample();
        assert_eq!(a.type_key(), b.type_key());
        assert_eq!(a.type_key(), TypeId::of::<Account>());
    }

    #[test]
    fn test_scalar_conversions() {
        assert!(matches!(42u8.to_value(), Value::U64(42)));
        assert!(matches!((-3i32).to_value(), Value::I64(-3)));
        assert!(matches!(true.to_value(), Value::Bool(true)));
        assert!(matches!(None::<String>.to_value(), Value::Null));
        match vec![1i64, 2].to_value() {
            Value::Seq(items) => assert_eq!(items.len(), 2),
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    #[test]
    fn test_field_descriptor_builder() {
        let field = FieldDescriptor::new("ssn").with(Redaction::NotLogged);
        assert_eq!(field.name, "ssn");
        assert_eq!(field.annotations, vec![Redaction::NotLogged]);
    }
}
