use crate::error::{Result, SyncError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    #[serde(rename = "float")]
    Number,
    #[serde(rename = "string")]
    Text,
    #[serde(rename = "bool")]
    Flag,
    #[serde(rename = "Vector3")]
    Vector3,
}

impl ValueType {
    pub const ALL: [ValueType; 4] = [
        ValueType::Number,
        ValueType::Text,
        ValueType::Flag,
        ValueType::Vector3,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            ValueType::Number => "float",
            ValueType::Text => "string",
            ValueType::Flag => "bool",
            ValueType::Vector3 => "Vector3",
        }
    }

    /// Resolves a type name as it appears in descriptors and commands.
    pub fn from_wire_name(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.wire_name() == name)
            .ok_or_else(|| SyncError::UnknownComponentType(format!("attribute type '{}'", name)))
    }

    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Number => Value::Number(0.0),
            ValueType::Text => Value::Text(String::new()),
            ValueType::Flag => Value::Flag(false),
            ValueType::Vector3 => Value::Vector3(0.0, 0.0, 0.0),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A type-erased attribute payload.
///
/// The wire form is plain JSON: numbers, strings and booleans map directly and
/// `Vector3` is an object with `x`, `y` and `z` members. Only finite numbers are
/// representable on the wire; attributes refuse anything else.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Flag(bool),
    Vector3(f64, f64, f64),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Number(_) => ValueType::Number,
            Value::Text(_) => ValueType::Text,
            Value::Flag(_) => ValueType::Flag,
            Value::Vector3(..) => ValueType::Vector3,
        }
    }

    pub fn encode(&self) -> serde_json::Value {
        match self {
            Value::Number(n) => serde_json::json!(n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Flag(b) => serde_json::Value::Bool(*b),
            Value::Vector3(x, y, z) => serde_json::json!({ "x": x, "y": y, "z": z }),
        }
    }

    /// Decodes `wire` as a value of type `expected`.
    ///
    /// A payload of the wrong shape is a `TypeMismatch`; nothing is coerced, so
    /// `"4"` is not a number and `1` is not a flag.
    pub fn decode(wire: &serde_json::Value, expected: ValueType) -> Result<Value> {
        let decoded = match (expected, wire) {
            (ValueType::Number, serde_json::Value::Number(n)) => n.as_f64().map(Value::Number),
            (ValueType::Text, serde_json::Value::String(s)) => Some(Value::Text(s.clone())),
            (ValueType::Flag, serde_json::Value::Bool(b)) => Some(Value::Flag(*b)),
            (ValueType::Vector3, serde_json::Value::Object(map)) => {
                match (map.get("x"), map.get("y"), map.get("z")) {
                    (Some(x), Some(y), Some(z)) => vector3_from(x, y, z),
                    _ => None,
                }
            }
            (ValueType::Vector3, serde_json::Value::Array(items)) if items.len() == 3 => {
                vector3_from(&items[0], &items[1], &items[2])
            }
            _ => None,
        };

        decoded.ok_or_else(|| SyncError::TypeMismatch {
            attribute: "<wire>".to_string(),
            expected: expected.to_string(),
            actual: wire_shape(wire).to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.encode())?))
    }

    pub fn from_bytes(data: &[u8], expected: ValueType) -> Result<Value> {
        let wire: serde_json::Value = serde_json::from_slice(data)?;
        Self::decode(&wire, expected)
    }

    /// False for a number or vector component that is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Number(n) => n.is_finite(),
            Value::Vector3(x, y, z) => x.is_finite() && y.is_finite() && z.is_finite(),
            Value::Text(_) | Value::Flag(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_vector3(&self) -> Option<(f64, f64, f64)> {
        match self {
            Value::Vector3(x, y, z) => Some((*x, *y, *z)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{}` on f64 prints the shortest string that parses back to the same bits.
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Flag(b) => write!(f, "{}", b),
            Value::Vector3(x, y, z) => write!(f, "({}, {}, {})", x, y, z),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Flag(b)
    }
}

impl From<(f64, f64, f64)> for Value {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Value::Vector3(x, y, z)
    }
}

fn vector3_from(
    x: &serde_json::Value,
    y: &serde_json::Value,
    z: &serde_json::Value,
) -> Option<Value> {
    Some(Value::Vector3(x.as_f64()?, y.as_f64()?, z.as_f64()?))
}

fn wire_shape(wire: &serde_json::Value) -> &'static str {
    match wire {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_every_variant() {
        let values = vec![
            Value::Number(4.2),
            Value::Number(-1.0e-300),
            Value::Number(0.1 + 0.2),
            Value::Text("print('hi')".to_string()),
            Value::Flag(true),
            Value::Vector3(1.5, -2.25, 1.0e10),
        ];

        for value in values {
            let wire = value.encode();
            assert_eq!(Value::decode(&wire, value.value_type()).unwrap(), value);

            let bytes = value.to_bytes().unwrap();
            assert_eq!(Value::from_bytes(&bytes, value.value_type()).unwrap(), value);
        }
    }

    #[test]
    fn test_vector3_wire_shape() {
        let wire = Value::Vector3(1.0, 2.0, 3.0).encode();
        assert_eq!(wire, serde_json::json!({"x": 1.0, "y": 2.0, "z": 3.0}));

        let from_array = Value::decode(&serde_json::json!([1, 2, 3]), ValueType::Vector3).unwrap();
        assert_eq!(from_array, Value::Vector3(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let two = serde_json::json!({"x": 1.0, "y": 2.0});
        assert!(matches!(
            Value::decode(&two, ValueType::Vector3),
            Err(SyncError::TypeMismatch { .. })
        ));

        let quoted = serde_json::json!("4");
        assert!(matches!(
            Value::decode(&quoted, ValueType::Number),
            Err(SyncError::TypeMismatch { .. })
        ));

        let one = serde_json::json!(1);
        assert!(Value::decode(&one, ValueType::Flag).is_err());
        assert!(Value::decode(&serde_json::Value::Null, ValueType::Text).is_err());
    }

    #[test]
    fn test_integer_json_decodes_as_number() {
        let value = Value::decode(&serde_json::json!(7), ValueType::Number).unwrap();
        assert_eq!(value, Value::Number(7.0));
    }

    #[test]
    fn test_malformed_bytes() {
        let err = Value::from_bytes(b"{not json", ValueType::Number).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn test_type_names() {
        for ty in ValueType::ALL {
            assert_eq!(ValueType::from_wire_name(ty.wire_name()).unwrap(), ty);
            assert_eq!(ty.default_value().value_type(), ty);
        }
        assert!(matches!(
            ValueType::from_wire_name("Color"),
            Err(SyncError::UnknownComponentType(_))
        ));
    }

    #[test]
    fn test_is_finite() {
        assert!(Value::Number(1.0e308).is_finite());
        assert!(!Value::Number(f64::NAN).is_finite());
        assert!(!Value::Vector3(1.0, 2.0, f64::INFINITY).is_finite());
        assert!(Value::Text("inf".to_string()).is_finite());
    }

    #[test]
    fn test_display_roundtrips_numbers() {
        let n = 0.1 + 0.2;
        let shown = Value::Number(n).to_string();
        assert_eq!(shown.parse::<f64>().unwrap(), n);
    }
}
