//! Flag evaluation against a resolution snapshot.
//!
//! Evaluation never fails outward: every error path collapses into an
//! [`Evaluation`] holding the caller's default, a reason, and an error code.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::error::{ConfidenceError, ErrorCode};
use crate::hash::hash_context;
use crate::value::{Struct, Value};

use super::{FlagPath, ResolveReason, Resolution};

/// Receives "flag was consulted" notifications.
///
/// Implementations must not block: evaluation calls this inline.
pub trait FlagApplier: Send + Sync {
    /// Called once a matched flag was read.
    fn apply(&self, flag: &str, resolve_token: &str);
}

/// Outcome of evaluating one flag path.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<T> {
    /// Resolved value, or the caller default on any fallback.
    pub value: T,
    /// Variant the value came from, when the flag matched.
    pub variant: Option<String>,
    /// Why this value was returned.
    pub reason: ResolveReason,
    /// Set when the default was returned because of an error.
    pub error_code: Option<ErrorCode>,
    /// Human-readable detail for `error_code`.
    pub error_message: Option<String>,
}

impl<T> Evaluation<T> {
    fn fallback(default: T, variant: Option<String>, reason: ResolveReason) -> Self {
        Self {
            value: default,
            variant,
            reason,
            error_code: None,
            error_message: None,
        }
    }

    fn failed(default: T, err: &ConfidenceError) -> Self {
        Self {
            value: default,
            variant: None,
            reason: ResolveReason::Error,
            error_code: Some(err.error_code()),
            error_message: Some(err.to_string()),
        }
    }
}

/// Types a resolved [`Value`] can be projected into.
///
/// Primitives require an exact variant match. [`Struct`] defaults drive the
/// projection key by key: every top-level key of the default must be present
/// in the resolved structure with a compatible type, otherwise the whole
/// default is used. A `null` resolved field, or an absent field below the top
/// level, falls back to the default's field. Resolved keys the default does
/// not name are ignored.
pub trait Evaluable: Sized + Clone {
    /// Converts `value`, or returns `None` if it does not fit.
    fn project(value: &Value, default: &Self) -> Option<Self>;
}

impl Evaluable for bool {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_bool()
    }
}

impl Evaluable for String {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_string().map(str::to_string)
    }
}

impl Evaluable for i64 {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_int()
    }
}

impl Evaluable for i32 {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_int().and_then(|v| i32::try_from(v).ok())
    }
}

impl Evaluable for f64 {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_double()
    }
}

impl Evaluable for NaiveDate {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_date()
    }
}

impl Evaluable for DateTime<Utc> {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_timestamp()
    }
}

impl Evaluable for Vec<Value> {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        value.as_list().map(<[Value]>::to_vec)
    }
}

/// Accepts any non-null value as is.
impl Evaluable for Value {
    fn project(value: &Value, _default: &Self) -> Option<Self> {
        (!value.is_null()).then(|| value.clone())
    }
}

impl Evaluable for Struct {
    fn project(value: &Value, default: &Self) -> Option<Self> {
        let resolved = value.as_struct()?;
        let mut out = Struct::with_capacity(default.len());
        for (key, default_field) in default {
            let field = match resolved.get(key) {
                None => return None,
                Some(Value::Null) => default_field.clone(),
                Some(found) => reconcile_field(found, default_field)?,
            };
            out.insert(key.clone(), field);
        }
        Some(out)
    }
}

fn reconcile_field(found: &Value, default: &Value) -> Option<Value> {
    match (found, default) {
        (Value::Struct(found), Value::Struct(default)) => {
            let mut out = Struct::with_capacity(default.len());
            for (key, default_field) in default {
                let field = match found.get(key) {
                    None | Some(Value::Null) => default_field.clone(),
                    Some(nested) => reconcile_field(nested, default_field)?,
                };
                out.insert(key.clone(), field);
            }
            Some(Value::Struct(out))
        }
        // A null default accepts whatever the backend sent.
        (_, Value::Null) => Some(found.clone()),
        (found, default) if found.value_type() == default.value_type() => Some(found.clone()),
        _ => None,
    }
}

enum Located<'a> {
    Found(&'a Value),
    /// Missing field or null leaf: the default applies to this leaf only.
    Absent,
}

fn locate<'a>(root: &'a Value, path: &[String]) -> Result<Located<'a>, ConfidenceError> {
    let mut current = root;
    for segment in path {
        let Value::Struct(fields) = current else {
            return Err(ConfidenceError::TypeMismatch {
                message: format!("cannot read field '{segment}' of a {} value", current.type_name()),
            });
        };
        match fields.get(segment) {
            None | Some(Value::Null) => return Ok(Located::Absent),
            Some(next) => current = next,
        }
    }
    Ok(Located::Found(current))
}

impl Resolution {
    /// Evaluates `flag_path` for `context`.
    ///
    /// If the flag is marked `should_apply`, `applier` is notified before the
    /// value is inspected, including when the snapshot is stale.
    pub fn evaluate<T: Evaluable>(
        &self,
        flag_path: &str,
        default: T,
        context: &Struct,
        applier: Option<&dyn FlagApplier>,
    ) -> Evaluation<T> {
        let parsed = match FlagPath::parse(flag_path) {
            Ok(parsed) => parsed,
            Err(err) => return Evaluation::failed(default, &err),
        };

        let Some(resolved) = self.flag(&parsed.flag) else {
            let err = ConfidenceError::FlagNotFound { flag: parsed.flag };
            return Evaluation::failed(default, &err);
        };

        if resolved.should_apply {
            if let Some(applier) = applier {
                applier.apply(&resolved.flag, &self.resolve_token);
            }
        }

        if self.context_hash() != hash_context(context) {
            debug!(flag = %resolved.flag, "cached resolution is stale for the current context");
            return Evaluation::fallback(default, None, ResolveReason::Stale);
        }

        if resolved.reason == ResolveReason::TargetingKeyError {
            return Evaluation {
                value: default,
                variant: None,
                reason: ResolveReason::TargetingKeyError,
                error_code: Some(ErrorCode::InvalidContext),
                error_message: Some("Invalid targeting key".to_string()),
            };
        }

        let Some(flag_value) = &resolved.value else {
            return Evaluation::fallback(default, resolved.variant.clone(), resolved.reason);
        };
        if resolved.reason != ResolveReason::Match {
            return Evaluation::fallback(default, resolved.variant.clone(), resolved.reason);
        }

        let root = Value::Struct(flag_value.clone());
        let leaf = match locate(&root, &parsed.path) {
            Ok(Located::Found(leaf)) => leaf,
            Ok(Located::Absent) => {
                return Evaluation::fallback(default, resolved.variant.clone(), ResolveReason::Match);
            }
            Err(err) => return Evaluation::failed(default, &err),
        };

        match T::project(leaf, &default) {
            Some(value) => Evaluation {
                value,
                variant: resolved.variant.clone(),
                reason: ResolveReason::Match,
                error_code: None,
                error_message: None,
            },
            None => {
                let err = ConfidenceError::TypeMismatch {
                    message: format!(
                        "resolved {} value at '{flag_path}' does not match the default's type",
                        leaf.type_name()
                    ),
                };
                Evaluation::failed(default, &err)
            }
        }
    }
}
