//! Activity log entries and the amendment filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A field-level change reported by whoever edited a feature or gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }

    /// Whether this change carries no information worth recording.
    pub fn is_noop(&self) -> bool {
        let absent_to_empty = self.old_value.is_null()
            && matches!(&self.new_value, Value::Array(items) if items.is_empty());
        absent_to_empty || render_value(&self.old_value) == render_value(&self.new_value)
    }
}

/// One recorded change inside an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub field_name: String,
    pub old_value: String,
    pub new_value: String,
}

/// An immutable log entry on a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub feature_id: i64,
    pub gate_id: Option<i64>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub amendments: Vec<Amendment>,
    pub created: DateTime<Utc>,
}

impl Activity {
    pub fn new(feature_id: i64, gate_id: Option<i64>, author: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature_id,
            gate_id,
            author: author.map(str::to_string),
            content: None,
            amendments: Vec::new(),
            created: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_amendments(mut self, amendments: Vec<Amendment>) -> Self {
        self.amendments = amendments;
        self
    }
}

/// Render a value the way amendments store it.
///
/// Strings are kept verbatim, null becomes `None`, everything else is its
/// JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Drop no-op changes and turn the rest into amendments, keeping order.
pub fn amendments_from_changes(changes: &[FieldChange]) -> Vec<Amendment> {
    changes
        .iter()
        .filter(|c| !c.is_noop())
        .map(|c| Amendment {
            field_name: c.field.clone(),
            old_value: render_value(&c.old_value),
            new_value: render_value(&c.new_value),
        })
        .collect()
}
