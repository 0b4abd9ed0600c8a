//! Event decoding.
//!
//! # Responsibilities
//! - Parse YAML (and therefore JSON) message bodies
//! - Normalize Ruby symbol keys and values (`:action: :add_ssl`)
//! - Reject events missing a field their action needs
//!
//! # Design Decisions
//! - Only identifier-like symbols are normalized, so `::1` survives
//! - Unknown keys are ignored; unknown actions are decode errors

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use crate::events::types::{Action, Event};

/// A message body that cannot become an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed message body: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Message body is not a mapping")]
    NotAMapping,

    #[error("Event {action} is missing field {field}")]
    MissingField {
        action: Action,
        field: &'static str,
    },
}

/// Decode a message body into an event.
pub fn decode(body: &str) -> Result<Event, DecodeError> {
    let value: Value = serde_yaml::from_str(body)?;
    let value = match normalize(value) {
        mapping @ Value::Mapping(_) => mapping,
        _ => return Err(DecodeError::NotAMapping),
    };
    let event: Event = serde_yaml::from_value(value)?;

    for &field in event.action.required_fields() {
        if event.field(field).is_none() {
            return Err(DecodeError::MissingField {
                action: event.action,
                field,
            });
        }
    }
    Ok(event)
}

fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_symbol(s)),
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(k, v)| (normalize(k), normalize(v)))
                .collect::<Mapping>(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(normalize).collect()),
        Value::Tagged(tagged) => normalize(tagged.value),
        other => other,
    }
}

fn strip_symbol(s: String) -> String {
    match s.strip_prefix(':') {
        Some(rest) if is_symbol_name(rest) => rest.to_string(),
        _ => s,
    }
}

fn is_symbol_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
