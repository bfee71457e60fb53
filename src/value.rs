//! Value types that contexts and resolved flags hold.
//!
//! A [`Value`] is a closed tagged union. Contexts are plain [`Struct`]s keyed
//! by attribute name; the targeting key is just a conventionally-named entry.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfidenceError;
use crate::time::format_iso_millis;

/// A structure of named values. Contexts are structures.
pub type Struct = HashMap<String, Value>;

/// Conventional context entry naming the evaluated subject.
pub const TARGETING_KEY: &str = "targeting_key";

/// Possible values a context attribute or flag field can hold.
///
/// # Examples
///
/// ```
/// use confidence::Value;
///
/// let flag = Value::Bool(true);
/// let size = Value::Int(3);
/// let name = Value::from("control");
///
/// assert_eq!(flag.as_bool(), Some(true));
/// assert_eq!(size.as_int(), Some(3));
/// assert!(name.as_int().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// Non-finite doubles are stored under their names so they survive JSON.
    #[serde(with = "double_repr")]
    Double(f64),
    /// Calendar date without time of day.
    Date(NaiveDate),
    /// Absolute point in time.
    Timestamp(DateTime<Utc>),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Nested structure.
    Struct(Struct),
    /// Explicit absence of a value.
    Null,
}

/// Discriminator returned by [`Value::value_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// [`Value::Bool`].
    Bool,
    /// [`Value::String`].
    String,
    /// [`Value::Int`].
    Int,
    /// [`Value::Double`].
    Double,
    /// [`Value::Date`].
    Date,
    /// [`Value::Timestamp`].
    Timestamp,
    /// [`Value::List`].
    List,
    /// [`Value::Struct`].
    Struct,
    /// [`Value::Null`].
    Null,
}

/// Element types a homogeneous list can be built from.
pub trait ListElement: Into<Value> {}

impl ListElement for bool {}
impl ListElement for String {}
impl ListElement for &str {}
impl ListElement for i32 {}
impl ListElement for i64 {}
impl ListElement for f64 {}
impl ListElement for NaiveDate {}
impl ListElement for DateTime<Utc> {}
impl ListElement for Struct {}

impl Value {
    /// Builds a list whose elements all come from the same Rust type.
    ///
    /// ```
    /// use confidence::Value;
    ///
    /// let tags = Value::list(["a", "b"]);
    /// assert_eq!(tags.as_list().map(<[Value]>::len), Some(2));
    /// ```
    pub fn list<T: ListElement>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a list from already-constructed values, rejecting mixed types.
    ///
    /// # Errors
    ///
    /// Returns `ConfidenceError::TypeMismatch` when two elements differ in type.
    pub fn try_list(items: Vec<Value>) -> Result<Self, ConfidenceError> {
        if let Some(first) = items.first() {
            let expected = first.value_type();
            if let Some(other) = items.iter().find(|v| v.value_type() != expected) {
                return Err(ConfidenceError::TypeMismatch {
                    message: format!(
                        "list elements must share one type: {} vs {}",
                        expected.name(),
                        other.value_type().name()
                    ),
                });
            }
        }
        Ok(Self::List(items))
    }

    /// Type tag of this value.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::String(_) => ValueType::String,
            Self::Int(_) => ValueType::Int,
            Self::Double(_) => ValueType::Double,
            Self::Date(_) => ValueType::Date,
            Self::Timestamp(_) => ValueType::Timestamp,
            Self::List(_) => ValueType::List,
            Self::Struct(_) => ValueType::Struct,
            Self::Null => ValueType::Null,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Inner value if this is a [`Value::Bool`].
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::String`].
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::Int`].
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::Double`].
    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::Date`].
    #[must_use]
    pub const fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(v) => Some(*v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::Timestamp`].
    #[must_use]
    pub const fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::List`].
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Inner value if this is a [`Value::Struct`].
    #[must_use]
    pub const fn as_struct(&self) -> Option<&Struct> {
        match self {
            Self::Struct(v) => Some(v),
            _ => None,
        }
    }

    /// Converts an externally-typed JSON value.
    ///
    /// Lists whose elements do not convert to one common type become a list of
    /// nulls of the same length instead of failing: a malformed attribute list
    /// must never block flag resolution.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Double),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                let converted: Vec<Value> = items.iter().map(Self::from_json).collect();
                Self::try_list(converted).unwrap_or_else(|_| Self::List(vec![Self::Null; items.len()]))
            }
            serde_json::Value::Object(map) => Self::Struct(struct_from_json(map)),
        }
    }

    /// Renders the value in the plain JSON shape transports expect.
    ///
    /// Dates become `YYYY-MM-DD`, timestamps millisecond UTC ISO-8601 strings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::String(v) => serde_json::Value::String(v.clone()),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Double(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Date(v) => serde_json::Value::String(v.format("%Y-%m-%d").to_string()),
            Self::Timestamp(v) => serde_json::Value::String(format_iso_millis(*v)),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Struct(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Null => serde_json::Value::Null,
        }
    }
}

impl ValueType {
    /// Lowercase name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::String => "string",
            Self::Int => "int",
            Self::Double => "double",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::List => "list",
            Self::Struct => "struct",
            Self::Null => "null",
        }
    }
}

/// Converts a JSON object into a [`Struct`], applying the lossy list policy.
#[must_use]
pub fn struct_from_json(map: &serde_json::Map<String, serde_json::Value>) -> Struct {
    map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect()
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Timestamp(v) => write!(f, "{}", format_iso_millis(*v)),
            Self::List(v) => write!(f, "list[{}]", v.len()),
            Self::Struct(v) => write!(f, "struct{{{}}}", v.len()),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Struct> for Value {
    fn from(v: Struct) -> Self {
        Self::Struct(v)
    }
}

/// JSON has no NaN or infinity; those are written as strings instead of `null`.
mod double_repr {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INFINITY: &str = "Infinity";
    const NEG_INFINITY: &str = "-Infinity";

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value.is_infinite() {
            serializer.serialize_str(if value.is_sign_positive() { INFINITY } else { NEG_INFINITY })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(DoubleVisitor)
    }

    struct DoubleVisitor;

    impl Visitor<'_> for DoubleVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                NAN => Ok(f64::NAN),
                INFINITY => Ok(f64::INFINITY),
                NEG_INFINITY => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors_return_none_on_mismatch() {
        let val = Value::Bool(true);
        assert_eq!(val.as_bool(), Some(true));
        assert!(val.as_int().is_none());
        assert!(val.as_double().is_none());
        assert!(val.as_string().is_none());
        assert!(val.as_struct().is_none());
        assert_eq!(val.value_type(), ValueType::Bool);
    }

    #[test]
    fn test_int_is_not_read_as_double() {
        let val = Value::Int(42);
        assert_eq!(val.as_int(), Some(42));
        assert!(val.as_double().is_none());
        assert_eq!(val.type_name(), "int");
    }

    #[test]
    fn test_homogeneous_list_construction() {
        let list = Value::list([1i64, 2, 3]);
        let items = list.as_list().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|v| v.value_type() == ValueType::Int));

        let empty = Value::list(Vec::<bool>::new());
        assert_eq!(empty.as_list().map(<[Value]>::len), Some(0));
    }

    #[test]
    fn test_try_list_rejects_mixed_types() {
        let err = Value::try_list(vec![Value::Int(1), Value::from("x")]).unwrap_err();
        assert!(matches!(err, ConfidenceError::TypeMismatch { .. }));
        assert!(Value::try_list(vec![Value::Int(1), Value::Int(2)]).is_ok());
    }

    #[test]
    fn test_from_json_degrades_mixed_list_to_nulls() {
        let json = serde_json::json!({"tags": [1, "two", true], "ok": [1, 2]});
        let Value::Struct(fields) = Value::from_json(&json) else {
            panic!("expected struct");
        };
        assert_eq!(fields["tags"], Value::List(vec![Value::Null, Value::Null, Value::Null]));
        assert_eq!(fields["ok"], Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(&serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Value::Double(1.5));
    }

    #[test]
    fn test_to_json_renders_dates_and_timestamps() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Value::Date(date).to_json(), serde_json::json!("2024-02-29"));

        let ts = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::Timestamp(ts).to_json(), serde_json::json!("2024-01-02T03:04:05.678Z"));
    }

    #[test]
    fn test_value_serialization() {
        let mut fields = Struct::new();
        fields.insert("size".to_string(), Value::Int(3));
        fields.insert("when".to_string(), Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let val = Value::Struct(fields);
        let json = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }

    #[test]
    fn test_non_finite_doubles_survive_serialization() {
        let mut fields = Struct::new();
        fields.insert("ratio".to_string(), Value::Double(f64::NAN));
        fields.insert("score".to_string(), Value::Double(f64::INFINITY));
        fields.insert("floor".to_string(), Value::Double(f64::NEG_INFINITY));
        fields.insert("plain".to_string(), Value::Double(0.5));

        let json = serde_json::to_string(&Value::Struct(fields)).unwrap();
        assert!(json.contains("\"NaN\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        let back = back.as_struct().unwrap();

        assert!(back["ratio"].as_double().unwrap().is_nan());
        assert_eq!(back["score"], Value::Double(f64::INFINITY));
        assert_eq!(back["floor"], Value::Double(f64::NEG_INFINITY));
        assert_eq!(back["plain"], Value::Double(0.5));
    }

    #[test]
    fn test_unknown_double_name_is_rejected() {
        let err = serde_json::from_str::<Value>(r#"{"type":"double","value":"big"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Int(42)), "42");
        assert_eq!(format!("{}", Value::from("hi")), "\"hi\"");
        assert_eq!(format!("{}", Value::Null), "null");
    }
}
