//! Row representation shared by every phase.
//!
//! A [`Record`] is a single row with a stable GUID and two interchangeable
//! shapes: *raw* (insertion-ordered positional values, matching an endpoint's
//! field order) and *named* (field name to value). A record is created in one
//! shape; the explicit unraw transition validates every positional value
//! against its field and re-keys it by name.

pub mod codec;

use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::Field;
use serde::de::Error as DeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use uuid::Uuid;

/// A single untyped field value
///
/// The job model only declares `int`, `string` and `bool` fields, but values
/// travel through JSON before validation, so floats and nulls are represented
/// too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
        }
    }

    /// Textual form used on the plaintext wire and in request fingerprints:
    /// booleans become `"1"`/`"0"`, null becomes the empty string, everything
    /// else its canonical textual form.
    pub fn to_wire_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(true) => "1".to_string(),
            Value::Boolean(false) => "0".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// The payload of a record: one shape at a time.
///
/// The unraw transition is the edge `Raw -> Transitional -> Named`; while
/// transitional, reads go by index against the raw side and writes go by name
/// against the named side.
#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Raw(Vec<Value>),
    Transitional {
        raw: Vec<Value>,
        named: HashMap<String, Value>,
    },
    Named(HashMap<String, Value>),
}

/// A single row with an ID to track it through every phase
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: Uuid,
    payload: Payload,
}

impl Record {
    /// Create an empty raw (positional) record with a new GUID
    pub fn new_raw() -> Self {
        Record {
            id: Uuid::new_v4(),
            payload: Payload::Raw(Vec::new()),
        }
    }

    /// Create an empty named record with a new GUID
    pub fn new_named() -> Self {
        Record {
            id: Uuid::new_v4(),
            payload: Payload::Named(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the record currently holds positional data. A record in the
    /// middle of the unraw transition is no longer considered raw.
    pub fn is_raw(&self) -> bool {
        matches!(self.payload, Payload::Raw(_))
    }

    /// Length of whichever shape is active
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Raw(values) => values.len(),
            Payload::Transitional { named, .. } => named.len(),
            Payload::Named(named) => named.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set a positional value. Indexes below the current length overwrite,
    /// an index equal to the length appends, anything past that is an error.
    pub fn set_index(&mut self, index: usize, value: Value) -> EtlResult<()> {
        match &mut self.payload {
            Payload::Raw(values) => {
                if index < values.len() {
                    values[index] = value;
                    Ok(())
                } else if index == values.len() {
                    values.push(value);
                    Ok(())
                } else {
                    Err(EtlError::bad_record(
                        format!(
                            "cannot set index {} on a raw record of length {}",
                            index,
                            values.len()
                        ),
                        Some(self.id.to_string()),
                    ))
                }
            }
            _ => Err(EtlError::bad_record(
                "expected a raw record for positional writes",
                Some(self.id.to_string()),
            )),
        }
    }

    /// Read a positional value; allowed while raw or mid-transition
    pub fn get_index(&self, index: usize) -> EtlResult<&Value> {
        let values = match &self.payload {
            Payload::Raw(values) => values,
            Payload::Transitional { raw, .. } => raw,
            Payload::Named(_) => {
                return Err(EtlError::bad_record(
                    "expected a raw record for positional reads",
                    Some(self.id.to_string()),
                ))
            }
        };
        values.get(index).ok_or_else(|| {
            EtlError::missing_field(index.to_string(), "raw record values".to_string())
        })
    }

    /// Set a named value; allowed while named or mid-transition
    pub fn set_named(&mut self, key: &str, value: Value) -> EtlResult<()> {
        match &mut self.payload {
            Payload::Transitional { named, .. } | Payload::Named(named) => {
                named.insert(key.to_string(), value);
                Ok(())
            }
            Payload::Raw(_) => Err(EtlError::bad_record(
                "expected a named record for keyed writes",
                Some(self.id.to_string()),
            )),
        }
    }

    /// Read a named value
    pub fn get_named(&self, key: &str) -> EtlResult<&Value> {
        match &self.payload {
            Payload::Named(named) => named
                .get(key)
                .ok_or_else(|| EtlError::missing_field(key, "record values".to_string())),
            _ => Err(EtlError::bad_record(
                "expected a named record for keyed reads",
                Some(self.id.to_string()),
            )),
        }
    }

    pub fn is_set_index(&self, index: usize) -> bool {
        match &self.payload {
            Payload::Raw(values) | Payload::Transitional { raw: values, .. } => {
                index < values.len()
            }
            Payload::Named(_) => false,
        }
    }

    pub fn is_set_named(&self, key: &str) -> bool {
        match &self.payload {
            Payload::Transitional { named, .. } | Payload::Named(named) => named.contains_key(key),
            Payload::Raw(_) => false,
        }
    }

    /// Begin the raw to named transition
    pub fn start_unraw(&mut self) -> EtlResult<()> {
        match std::mem::replace(&mut self.payload, Payload::Named(HashMap::new())) {
            Payload::Raw(raw) => {
                self.payload = Payload::Transitional {
                    raw,
                    named: HashMap::new(),
                };
                Ok(())
            }
            other => {
                self.payload = other;
                Err(EtlError::bad_record(
                    "unraw can only start on a raw record",
                    Some(self.id.to_string()),
                ))
            }
        }
    }

    /// Finish the transition, dropping the raw payload
    pub fn end_unraw(&mut self) -> EtlResult<()> {
        match std::mem::replace(&mut self.payload, Payload::Named(HashMap::new())) {
            Payload::Transitional { named, .. } => {
                self.payload = Payload::Named(named);
                Ok(())
            }
            other => {
                self.payload = other;
                Err(EtlError::bad_record(
                    "unraw has not been started on this record",
                    Some(self.id.to_string()),
                ))
            }
        }
    }

    /// Validate every positional value against the matching field definition
    /// and re-key the record by field name. The positional payload must match
    /// the field list exactly.
    pub fn unraw(&mut self, fields: &[Field]) -> EtlResult<()> {
        if self.len() != fields.len() {
            return Err(EtlError::bad_record(
                format!(
                    "row length ({}) does not match endpoint fields ({})",
                    self.len(),
                    fields.len()
                ),
                Some(self.id.to_string()),
            ));
        }
        self.start_unraw()?;
        for (index, field) in fields.iter().enumerate() {
            let value = self.get_index(index)?.clone();
            let validated = field.validate(&value)?;
            self.set_named(&field.name, validated)?;
        }
        self.end_unraw()
    }

    /// Populate the active shape from a plain JSON document: a list for raw
    /// records, an object for named ones.
    pub fn populate_from_json(&mut self, data: &str) -> EtlResult<()> {
        if self.is_raw() {
            let values: Vec<Value> = serde_json::from_str(data)?;
            for (index, value) in values.into_iter().enumerate() {
                self.set_index(index, value)?;
            }
        } else {
            let values: HashMap<String, Value> = serde_json::from_str(data)?;
            for (key, value) in values {
                self.set_named(&key, value)?;
            }
        }
        Ok(())
    }

    /// Render the record as one plaintext line following the field layout
    pub fn to_line(&self, fields: &[Field]) -> EtlResult<String> {
        codec::format_line(self, fields)
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Record", 3)?;
        state.serialize_field("guid", &self.id.to_string())?;
        state.serialize_field("raw", &self.is_raw())?;
        match &self.payload {
            Payload::Raw(values) => state.serialize_field("data", values)?,
            Payload::Transitional { named, .. } | Payload::Named(named) => {
                state.serialize_field("data", named)?
            }
        }
        state.end()
    }
}

#[derive(Deserialize)]
struct RecordRepr {
    guid: String,
    raw: bool,
    data: serde_json::Value,
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = RecordRepr::deserialize(deserializer)?;
        let id = Uuid::parse_str(&repr.guid).map_err(D::Error::custom)?;
        let payload = if repr.raw {
            let values: Vec<Value> =
                serde_json::from_value(repr.data).map_err(D::Error::custom)?;
            Payload::Raw(values)
        } else {
            let named: HashMap<String, Value> =
                serde_json::from_value(repr.data).map_err(D::Error::custom)?;
            Payload::Named(named)
        };
        Ok(Record { id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowflow::metadata::{Field, FieldType};

    fn int_field(name: &str) -> Field {
        Field {
            name: name.to_string(),
            expected_type: FieldType::Int,
            fixed_length: 2,
            max_length: 0,
            end_character: String::new(),
            padding: Default::default(),
        }
    }

    fn string_field(name: &str) -> Field {
        Field {
            name: name.to_string(),
            expected_type: FieldType::String,
            fixed_length: 0,
            max_length: 8,
            end_character: ",".to_string(),
            padding: Default::default(),
        }
    }

    #[test]
    fn test_raw_set_and_get() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("a")).unwrap();
        record.set_index(1, Value::from(7i64)).unwrap();
        record.set_index(0, Value::from("b")).unwrap();

        assert_eq!(record.len(), 2);
        assert_eq!(record.get_index(0).unwrap(), &Value::from("b"));
        assert!(record.is_set_index(1));
        assert!(!record.is_set_index(2));
    }

    #[test]
    fn test_raw_set_past_end_is_rejected() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("a")).unwrap();
        let err = record.set_index(5, Value::from("z")).unwrap_err();
        assert!(matches!(err, EtlError::BadRecord { .. }));
    }

    #[test]
    fn test_shape_mismatch_errors() {
        let mut raw = Record::new_raw();
        assert!(raw.set_named("x", Value::Null).is_err());

        let mut named = Record::new_named();
        assert!(named.set_index(0, Value::Null).is_err());
        assert!(named.get_index(0).is_err());
    }

    #[test]
    fn test_unraw_transition() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("42")).unwrap();
        record.set_index(1, Value::from("hi")).unwrap();

        let fields = vec![int_field("id"), string_field("name")];
        record.unraw(&fields).unwrap();

        assert!(!record.is_raw());
        assert_eq!(record.get_named("id").unwrap(), &Value::Integer(42));
        assert_eq!(record.get_named("name").unwrap(), &Value::from("hi"));
    }

    #[test]
    fn test_unraw_length_mismatch() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("42")).unwrap();

        let fields = vec![int_field("id"), string_field("name")];
        assert!(record.unraw(&fields).is_err());
    }

    #[test]
    fn test_transitional_read_write_rules() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("x")).unwrap();
        record.start_unraw().unwrap();

        // mid-transition: reads by index, writes by name
        assert_eq!(record.get_index(0).unwrap(), &Value::from("x"));
        record.set_named("a", Value::from("x")).unwrap();
        assert!(record.get_named("a").is_err());
        assert!(record.set_index(0, Value::Null).is_err());

        record.end_unraw().unwrap();
        assert_eq!(record.get_named("a").unwrap(), &Value::from("x"));
        assert!(record.get_index(0).is_err());
    }

    #[test]
    fn test_json_round_trip_raw() {
        let mut record = Record::new_raw();
        record.set_index(0, Value::from("a")).unwrap();
        record.set_index(1, Value::Integer(3)).unwrap();
        record.set_index(2, Value::Boolean(true)).unwrap();

        let encoded = serde_json::to_string(&record).unwrap();
        assert!(encoded.contains("\"raw\":true"));

        let decoded: Record = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_json_round_trip_named() {
        let mut record = Record::new_named();
        record.set_named("name", Value::from("ada")).unwrap();
        record.set_named("age", Value::Integer(36)).unwrap();
        record.set_named("missing", Value::Null).unwrap();

        let encoded = serde_json::to_string(&record).unwrap();
        assert!(encoded.contains("\"raw\":false"));

        let decoded: Record = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_populate_from_json() {
        let mut raw = Record::new_raw();
        raw.populate_from_json("[\"a\", 2, false]").unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw.get_index(2).unwrap(), &Value::Boolean(false));

        let mut named = Record::new_named();
        named.populate_from_json("{\"x\": 1.5}").unwrap();
        assert_eq!(named.get_named("x").unwrap(), &Value::Float(1.5));
    }

    #[test]
    fn test_wire_strings() {
        assert_eq!(Value::Boolean(true).to_wire_string(), "1");
        assert_eq!(Value::Boolean(false).to_wire_string(), "0");
        assert_eq!(Value::Null.to_wire_string(), "");
        assert_eq!(Value::Integer(-3).to_wire_string(), "-3");
        assert_eq!(Value::from("abc").to_wire_string(), "abc");
    }
}
