//! Point-lookup requests and their string projections.

use crate::rowflow::metadata::Field;
use crate::rowflow::record::codec;
use crate::rowflow::record::Value;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

/// The information a datasource needs to fetch data: the object to query and
/// an equality filter per field.
///
/// Filters live in a `BTreeMap` ordered by field name, so the two string
/// projections are deterministic regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    pub object_id: String,
    pub filters: BTreeMap<Field, Value>,
}

impl Request {
    pub fn new(object_id: impl Into<String>, filters: BTreeMap<Field, Value>) -> Self {
        Request {
            object_id: object_id.into(),
            filters,
        }
    }

    /// A request with no filters; matches every row
    pub fn empty(object_id: impl Into<String>) -> Self {
        Request {
            object_id: object_id.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Cache fingerprint: `"<objectID>-><f1>:<v1>#<f2>:<v2>#…"`
    pub fn fingerprint(&self) -> String {
        let mut filters = String::new();
        for (field, value) in &self.filters {
            filters.push_str(&field.name);
            filters.push(':');
            filters.push_str(&value.to_wire_string());
            filters.push('#');
        }
        format!("{}->{}", self.object_id, filters)
    }

    /// In-process set key: `"<f1>=<v1>#<f2>=<v2>#…"`
    pub fn hash_code(&self) -> String {
        let mut result = String::new();
        for (field, value) in &self.filters {
            result.push_str(&field.name);
            result.push('=');
            result.push_str(&value.to_wire_string());
            result.push('#');
        }
        result
    }

    /// Test a parsed line against every filter. Filter values are encoded
    /// through the field codec first, so a padded on-disk value matches its
    /// unpadded filter.
    pub fn matches(&self, parsed: &HashMap<String, String>) -> bool {
        self.filters.iter().all(|(field, value)| {
            match (parsed.get(&field.name), codec::format_field(field, value)) {
                (Some(raw), Ok(expected)) => raw == &expected,
                _ => false,
            }
        })
    }
}

impl Serialize for Request {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let filters: BTreeMap<&str, &Value> = self
            .filters
            .iter()
            .map(|(field, value)| (field.name.as_str(), value))
            .collect();
        let mut state = serializer.serialize_struct("Request", 2)?;
        state.serialize_field("objectID", &self.object_id)?;
        state.serialize_field("filters", &filters)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowflow::metadata::{FieldType, Padding, PaddingMode};

    fn field(name: &str, fixed_length: usize) -> Field {
        Field {
            name: name.to_string(),
            expected_type: FieldType::String,
            fixed_length,
            max_length: if fixed_length == 0 { 8 } else { 0 },
            end_character: if fixed_length == 0 {
                ",".to_string()
            } else {
                String::new()
            },
            padding: Padding {
                mode: PaddingMode::Left,
                character: "0".to_string(),
            },
        }
    }

    #[test]
    fn test_fingerprint_is_sorted_by_field_name() {
        let mut forward = BTreeMap::new();
        forward.insert(field("a", 2), Value::Integer(1));
        forward.insert(field("b", 2), Value::Integer(2));

        let mut reverse = BTreeMap::new();
        reverse.insert(field("b", 2), Value::Integer(2));
        reverse.insert(field("a", 2), Value::Integer(1));

        let first = Request::new("users", forward);
        let second = Request::new("users", reverse);

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint(), "users->a:1#b:2#");
        assert_eq!(first.hash_code(), second.hash_code());
        assert_eq!(first.hash_code(), "a=1#b=2#");
    }

    #[test]
    fn test_empty_request() {
        let request = Request::empty("users");
        assert_eq!(request.fingerprint(), "users->");
        assert!(request.matches(&HashMap::new()));
    }

    #[test]
    fn test_matches_pads_filter_values() {
        let mut filters = BTreeMap::new();
        filters.insert(field("id", 4), Value::Integer(7));
        let request = Request::new("users", filters);

        let mut parsed = HashMap::new();
        parsed.insert("id".to_string(), "0007".to_string());
        assert!(request.matches(&parsed));

        parsed.insert("id".to_string(), "0008".to_string());
        assert!(!request.matches(&parsed));
    }

    #[test]
    fn test_serializes_filters_by_field_name() {
        let mut filters = BTreeMap::new();
        filters.insert(field("id", 4), Value::Integer(7));
        let request = Request::new("users", filters);

        let encoded = serde_json::to_string(&request).unwrap();
        assert_eq!(encoded, "{\"objectID\":\"users\",\"filters\":{\"id\":7}}");
    }
}
