use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Namespace used for the engine's own entities (datasets, structures, servers)
pub const SYSTEM_NAMESPACE: &str = "ks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::String
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Coerce a scalar into the representation declared for a field.
///
/// Markup attributes always arrive as text, JSON may already be typed; both
/// end up as the same `serde_json::Value` after coercion. Unparseable input is
/// kept as a string rather than dropped.
pub fn coerce_scalar(data_type: DataType, value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;

    match (data_type, value) {
        (_, Value::Null) => Value::Null,
        (DataType::String, Value::String(_)) => value.clone(),
        (DataType::String, other) => Value::String(scalar_to_text(other)),
        (DataType::Date, Value::String(_)) => value.clone(),
        (DataType::Date, other) => Value::String(scalar_to_text(other)),
        (DataType::Boolean, Value::Bool(_)) => value.clone(),
        (DataType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Value::Bool(true),
            "false" | "0" | "no" => Value::Bool(false),
            "" => Value::Null,
            _ => value.clone(),
        },
        (DataType::Boolean, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (DataType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => value.clone(),
        (DataType::Integer, Value::Number(n)) => n
            .as_f64()
            .map(|f| Value::from(f as i64))
            .unwrap_or(Value::Null),
        (DataType::Integer, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            trimmed
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone())
        }
        (DataType::Float, Value::Number(_)) => value.clone(),
        (DataType::Float, Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone())
        }
        (_, other) => other.clone(),
    }
}

/// Render a scalar the way it appears inside a markup attribute
pub fn scalar_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_text_into_declared_types() {
        assert_eq!(coerce_scalar(DataType::Boolean, &json!("True")), json!(true));
        assert_eq!(coerce_scalar(DataType::Boolean, &json!("0")), json!(false));
        assert_eq!(coerce_scalar(DataType::Integer, &json!(" 42 ")), json!(42));
        assert_eq!(coerce_scalar(DataType::Integer, &json!("")), json!(null));
        assert_eq!(coerce_scalar(DataType::Float, &json!("2.5")), json!(2.5));
        assert_eq!(coerce_scalar(DataType::String, &json!(7)), json!("7"));
    }

    #[test]
    fn test_unparseable_values_are_kept() {
        assert_eq!(
            coerce_scalar(DataType::Integer, &json!("many")),
            json!("many")
        );
    }

    #[test]
    fn test_scalar_to_text() {
        assert_eq!(scalar_to_text(&json!(null)), "");
        assert_eq!(scalar_to_text(&json!(true)), "true");
        assert_eq!(scalar_to_text(&json!(3)), "3");
    }
}
