//! Field definitions and value validation.

use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::record::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    String,
    Bool,
}

/// Which side of a fixed-length value receives padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    Left,
    Right,
}

/// Padding configuration for fixed-length fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Padding {
    #[serde(default = "default_padding_mode")]
    pub mode: PaddingMode,
    #[serde(rename = "char", default)]
    pub character: String,
}

fn default_padding_mode() -> PaddingMode {
    PaddingMode::Right
}

impl Default for Padding {
    fn default() -> Self {
        Padding {
            mode: PaddingMode::Right,
            character: String::new(),
        }
    }
}

/// One field of a data endpoint's row layout.
///
/// A field is either fixed-length (`fixed_length > 0`) or delimited
/// (`max_length > 0` with a one-character `end_character`); exactly one of
/// the two shapes must hold.
///
/// Ordering, equality and hashing are by name only, so filter maps keyed by
/// `Field` sort deterministically regardless of layout attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub expected_type: FieldType,
    #[serde(default)]
    pub fixed_length: usize,
    #[serde(default)]
    pub max_length: usize,
    #[serde(default)]
    pub end_character: String,
    #[serde(default)]
    pub padding: Padding,
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Field {
    pub fn is_fixed(&self) -> bool {
        self.fixed_length > 0
    }

    pub fn is_delimited(&self) -> bool {
        self.max_length > 0 && self.end_character.chars().count() == 1
    }

    /// Check the one-shape-at-a-time invariant
    pub fn check(&self) -> EtlResult<()> {
        match (self.is_fixed(), self.is_delimited()) {
            (true, false) | (false, true) => Ok(()),
            _ => Err(EtlError::bad_metadata(format!(
                "wrong definition for field '{}': must have either fixedLength or both maxLength and a one-character endCharacter",
                self.name
            ))),
        }
    }

    /// Coerce a value to the field's declared type, or fail with the reason
    pub fn validate(&self, value: &Value) -> EtlResult<Value> {
        match self.expected_type {
            FieldType::Int => self.validate_int(value),
            FieldType::String => self.validate_string(value),
            FieldType::Bool => self.validate_bool(value),
        }
    }

    fn validate_int(&self, value: &Value) -> EtlResult<Value> {
        match value {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::String(s) => s.trim().parse::<i64>().map(Value::Integer).map_err(|_| {
                self.conversion_error(value)
            }),
            _ => Err(self.conversion_error(value)),
        }
    }

    fn validate_string(&self, value: &Value) -> EtlResult<Value> {
        match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(self.conversion_error(value)),
        }
    }

    fn validate_bool(&self, value: &Value) -> EtlResult<Value> {
        match value {
            Value::Boolean(b) => Ok(Value::Boolean(*b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(self.conversion_error(value)),
            },
            Value::Integer(0) => Ok(Value::Boolean(false)),
            Value::Integer(1) => Ok(Value::Boolean(true)),
            Value::Float(f) if *f == 0.0 => Ok(Value::Boolean(false)),
            Value::Float(f) if *f == 1.0 => Ok(Value::Boolean(true)),
            _ => Err(self.conversion_error(value)),
        }
    }

    fn conversion_error(&self, value: &Value) -> EtlError {
        EtlError::bad_record(
            format!(
                "cannot convert field '{}' with value '{}' ({}) to {:?}",
                self.name,
                value.to_wire_string(),
                value.type_name(),
                self.expected_type
            ),
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(expected_type: FieldType) -> Field {
        Field {
            name: "f".to_string(),
            expected_type,
            fixed_length: 2,
            max_length: 0,
            end_character: String::new(),
            padding: Default::default(),
        }
    }

    #[test]
    fn test_int_validation() {
        let f = field(FieldType::Int);
        assert_eq!(f.validate(&Value::Integer(7)).unwrap(), Value::Integer(7));
        assert_eq!(f.validate(&Value::from("42")).unwrap(), Value::Integer(42));
        assert_eq!(f.validate(&Value::from(" 07 ")).unwrap(), Value::Integer(7));
        assert!(f.validate(&Value::from("x")).is_err());
        assert!(f.validate(&Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_bool_validation() {
        let f = field(FieldType::Bool);
        assert_eq!(
            f.validate(&Value::Boolean(true)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(f.validate(&Value::from("1")).unwrap(), Value::Boolean(true));
        assert_eq!(
            f.validate(&Value::from("FALSE")).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            f.validate(&Value::Integer(0)).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            f.validate(&Value::Float(1.0)).unwrap(),
            Value::Boolean(true)
        );
        assert!(f.validate(&Value::Integer(2)).is_err());
        assert!(f.validate(&Value::from("yes")).is_err());
    }

    #[test]
    fn test_string_validation() {
        let f = field(FieldType::String);
        assert_eq!(f.validate(&Value::from("hi")).unwrap(), Value::from("hi"));
        assert!(f.validate(&Value::Integer(1)).is_err());
    }

    #[test]
    fn test_shape_invariant() {
        let mut f = field(FieldType::String);
        assert!(f.check().is_ok());

        // both shapes at once
        f.max_length = 4;
        f.end_character = ",".to_string();
        assert!(f.check().is_err());

        // neither shape
        f.fixed_length = 0;
        f.end_character = String::new();
        assert!(f.check().is_err());

        // delimited only
        f.end_character = ",".to_string();
        assert!(f.check().is_ok());
    }

    #[test]
    fn test_field_identity_is_by_name() {
        let a = field(FieldType::Int);
        let mut b = field(FieldType::String);
        b.fixed_length = 9;
        assert_eq!(a, b);

        let mut c = b.clone();
        c.name = "g".to_string();
        assert!(a < c);
    }
}
