//! Field validation for submitted records.

use super::{FieldKind, FieldRule};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Why a submission was refused. Reports the first offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    Missing(String),

    #[error("Field {0} must be a string")]
    NotAString(String),

    #[error("Field {field} exceeds {max} characters")]
    TooLong { field: String, max: usize },

    #[error("Field {0} is not a valid email address")]
    InvalidEmail(String),
}

/// Check a submitted JSON body against a collection's rules.
///
/// Returns the accepted fields, trimmed. Fields not named by a rule are
/// dropped; empty optional fields are omitted.
pub fn validate_fields(
    rules: &[FieldRule],
    body: &Value,
) -> Result<BTreeMap<String, String>, ValidationError> {
    let object: &Map<String, Value> = body.as_object().ok_or(ValidationError::NotAnObject)?;
    let mut accepted = BTreeMap::new();

    for rule in rules {
        let value = match object.get(&rule.name) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.trim()),
            Some(_) => return Err(ValidationError::NotAString(rule.name.clone())),
        };

        let value = match value {
            Some(v) if !v.is_empty() => v,
            _ if rule.required => return Err(ValidationError::Missing(rule.name.clone())),
            _ => continue,
        };

        if value.chars().count() > rule.max_len {
            return Err(ValidationError::TooLong {
                field: rule.name.clone(),
                max: rule.max_len,
            });
        }

        if rule.kind == FieldKind::Email && !EMAIL_RE.is_match(value) {
            return Err(ValidationError::InvalidEmail(rule.name.clone()));
        }

        accepted.insert(rule.name.clone(), value.to_string());
    }

    Ok(accepted)
}
