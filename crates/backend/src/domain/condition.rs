//! Relay filter predicates
//!
//! A [`FilterCondition`] is a serializable predicate over a [`SignalMessage`]
//! and its JSON content. Field paths are dot separated (`order.total`) and
//! are resolved inside the content value; array elements are addressed by
//! index (`items.0.sku`).
//!
//! Conditions serialize as tagged objects so they can live in definition
//! files:
//!
//! ```toml
//! [doors.condition]
//! type = "field_greater_than"
//! field = "total"
//! value = 100.0
//! ```

use serde::{Deserialize, Serialize};

use super::signal::SignalMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterCondition {
  /// Matches every message
  Always,
  FieldExists {
    field: String,
  },
  FieldEquals {
    field: String,
    value: serde_json::Value,
  },
  FieldGreaterThan {
    field: String,
    value: f64,
  },
  FieldLessThan {
    field: String,
    value: f64,
  },
  FieldContains {
    field: String,
    substring: String,
  },
  /// Content type name ends with `name` (so `Order` matches `app::Order`)
  ContentType {
    name: String,
  },
  /// Source signal (or door) name, case-insensitive
  SourceName {
    name: String,
  },
  FromDoor {
    is_door: bool,
  },
  And {
    conditions: Vec<FilterCondition>,
  },
  Or {
    conditions: Vec<FilterCondition>,
  },
  Not {
    condition: Box<FilterCondition>,
  },
}

impl FilterCondition {
  pub fn evaluate(&self, message: &SignalMessage) -> bool {
    let source = &message.source;
    let field = |path: &str| content_field(message, path);

    match self {
      FilterCondition::Always => true,
      FilterCondition::FieldExists { field: path } => field(path).is_some_and(|v| !v.is_null()),
      FilterCondition::FieldEquals { field: path, value } => field(path) == Some(value),
      FilterCondition::FieldGreaterThan { field: path, value } => {
        field(path).and_then(|v| v.as_f64()).is_some_and(|v| v > *value)
      }
      FilterCondition::FieldLessThan { field: path, value } => {
        field(path).and_then(|v| v.as_f64()).is_some_and(|v| v < *value)
      }
      FilterCondition::FieldContains { field: path, substring } => field(path)
        .and_then(|v| v.as_str())
        .is_some_and(|v| v.contains(substring.as_str())),
      FilterCondition::ContentType { name } => source
        .content
        .as_ref()
        .is_some_and(|c| c.type_name == *name || c.type_name.ends_with(&format!("::{}", name))),
      FilterCondition::SourceName { name } => source
        .signal_id
        .name
        .as_deref()
        .is_some_and(|n| n.eq_ignore_ascii_case(name)),
      FilterCondition::FromDoor { is_door } => source.is_door == *is_door,
      FilterCondition::And { conditions } => conditions.iter().all(|c| c.evaluate(message)),
      FilterCondition::Or { conditions } => conditions.iter().any(|c| c.evaluate(message)),
      FilterCondition::Not { condition } => !condition.evaluate(message),
    }
  }

  pub fn field_equals(field: &str, value: serde_json::Value) -> Self {
    FilterCondition::FieldEquals {
      field: field.to_string(),
      value,
    }
  }

  pub fn field_greater_than(field: &str, value: f64) -> Self {
    FilterCondition::FieldGreaterThan {
      field: field.to_string(),
      value,
    }
  }

  pub fn negate(self) -> Self {
    FilterCondition::Not {
      condition: Box::new(self),
    }
  }
}

fn content_field<'a>(message: &'a SignalMessage, path: &str) -> Option<&'a serde_json::Value> {
  message
    .source
    .content
    .as_ref()
    .and_then(|content| lookup(&content.value, path))
}

fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
  if path.is_empty() {
    return Some(value);
  }

  path.split('.').try_fold(value, |current, segment| match current {
    serde_json::Value::Object(map) => map.get(segment),
    serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
    _ => None,
  })
}
