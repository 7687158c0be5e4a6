//! Plaintext line codec.
//!
//! A line is the concatenation of its encoded fields in declared order.
//! Fixed-length fields occupy exactly `fixed_length` code points, padded on
//! the configured side. Delimited fields hold up to `max_length` code points
//! and are terminated by `end_character` unless they are full-width, in which
//! case the delimiter is omitted. All width arithmetic counts code points,
//! not bytes.

use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::{Field, PaddingMode};
use crate::rowflow::record::{Record, Value};
use std::collections::HashMap;

/// Parse one line into a field-name to raw-string map
pub fn parse_line(line: &str, fields: &[Field]) -> EtlResult<HashMap<String, String>> {
    let chars: Vec<char> = line.chars().collect();
    let mut position = 0usize;
    let mut result = HashMap::with_capacity(fields.len());

    for field in fields {
        if field.is_fixed() {
            if position + field.fixed_length > chars.len() {
                return Err(EtlError::bad_record(
                    format!(
                        "truncated line: field '{}' needs {} characters but only {} remain",
                        field.name,
                        field.fixed_length,
                        chars.len() - position
                    ),
                    None,
                ));
            }
            let value: String = chars[position..position + field.fixed_length].iter().collect();
            position += field.fixed_length;
            result.insert(field.name.clone(), value);
        } else if field.is_delimited() {
            let end = field
                .end_character
                .chars()
                .next()
                .ok_or_else(|| bad_field_definition(field))?;
            let mut value = String::new();
            while value.chars().count() < field.max_length && position < chars.len() {
                let c = chars[position];
                position += 1;
                if c == end {
                    break;
                }
                value.push(c);
            }
            result.insert(field.name.clone(), value);
        } else {
            return Err(bad_field_definition(field));
        }
    }

    if position < chars.len() {
        return Err(EtlError::bad_record(
            format!(
                "line has {} trailing characters past the declared layout",
                chars.len() - position
            ),
            None,
        ));
    }
    Ok(result)
}

/// Encode one value for its field: fixed-length values are padded to width,
/// delimited values are length-checked. The delimiter itself is appended at
/// line level, not here.
pub fn format_field(field: &Field, value: &Value) -> EtlResult<String> {
    let text = value.to_wire_string();
    let width = text.chars().count();

    if field.is_fixed() {
        if width > field.fixed_length {
            return Err(EtlError::field_too_long(
                &field.name,
                field.fixed_length,
                width,
            ));
        }
        if width == field.fixed_length {
            return Ok(text);
        }
        let pad_char = match field.padding.character.chars().collect::<Vec<char>>()[..] {
            [c] => c,
            _ => {
                return Err(EtlError::bad_metadata(format!(
                    "field '{}' has a fixed length but its padding character is not a single character",
                    field.name
                )))
            }
        };
        let pad: String = std::iter::repeat(pad_char)
            .take(field.fixed_length - width)
            .collect();
        match field.padding.mode {
            PaddingMode::Left => Ok(format!("{}{}", pad, text)),
            PaddingMode::Right => Ok(format!("{}{}", text, pad)),
        }
    } else if field.is_delimited() {
        if width > field.max_length {
            return Err(EtlError::field_too_long(&field.name, field.max_length, width));
        }
        Ok(text)
    } else {
        Err(bad_field_definition(field))
    }
}

/// Render a record as a line following the field layout. Raw records are read
/// positionally, named records by field name.
pub fn format_line(record: &Record, fields: &[Field]) -> EtlResult<String> {
    let mut result = String::new();
    for (index, field) in fields.iter().enumerate() {
        let value = if record.is_raw() {
            record.get_index(index)?
        } else {
            record
                .get_named(&field.name)
                .map_err(|_| EtlError::missing_field(&field.name, "target record".to_string()))?
        };
        let formatted = format_field(field, value)?;
        let width = formatted.chars().count();
        result.push_str(&formatted);
        if field.is_delimited() && width < field.max_length {
            result.push_str(&field.end_character);
        }
    }
    Ok(result)
}

fn bad_field_definition(field: &Field) -> EtlError {
    EtlError::bad_metadata(format!(
        "wrong definition for field '{}': must have either fixedLength or both maxLength and a one-character endCharacter",
        field.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowflow::metadata::{FieldType, Padding};

    fn fixed(name: &str, length: usize) -> Field {
        Field {
            name: name.to_string(),
            expected_type: FieldType::String,
            fixed_length: length,
            max_length: 0,
            end_character: String::new(),
            padding: Padding {
                mode: PaddingMode::Left,
                character: "0".to_string(),
            },
        }
    }

    fn delimited(name: &str, max: usize) -> Field {
        Field {
            name: name.to_string(),
            expected_type: FieldType::String,
            fixed_length: 0,
            max_length: max,
            end_character: ",".to_string(),
            padding: Default::default(),
        }
    }

    #[test]
    fn test_fixed_length_parse() {
        let fields = vec![fixed("a", 2), fixed("b", 3)];
        let parsed = parse_line("aabbb", &fields).unwrap();
        assert_eq!(parsed["a"], "aa");
        assert_eq!(parsed["b"], "bbb");
    }

    #[test]
    fn test_fixed_length_parse_truncated() {
        let fields = vec![fixed("a", 2), fixed("b", 3)];
        let err = parse_line("aabb", &fields).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_delimited_parse() {
        let fields = vec![delimited("a", 5), delimited("b", 3)];
        let parsed = parse_line("hi,xyz", &fields).unwrap();
        assert_eq!(parsed["a"], "hi");
        assert_eq!(parsed["b"], "xyz");
    }

    #[test]
    fn test_trailing_characters_are_rejected() {
        let fields = vec![fixed("a", 2)];
        assert!(parse_line("aaz", &fields).is_err());
    }

    #[test]
    fn test_padding_format() {
        let field = fixed("n", 4);
        assert_eq!(format_field(&field, &Value::Integer(42)).unwrap(), "0042");

        let err = format_field(&field, &Value::Integer(99999)).unwrap_err();
        assert!(matches!(err, EtlError::FieldTooLong { .. }));
    }

    #[test]
    fn test_right_padding_format() {
        let mut field = fixed("n", 4);
        field.padding.mode = PaddingMode::Right;
        field.padding.character = " ".to_string();
        assert_eq!(format_field(&field, &Value::from("ab")).unwrap(), "ab  ");
    }

    #[test]
    fn test_missing_padding_character_is_rejected() {
        let mut field = fixed("n", 4);
        field.padding.character = String::new();
        assert!(matches!(
            format_field(&field, &Value::from("ab")).unwrap_err(),
            EtlError::BadMetadata { .. }
        ));
    }

    #[test]
    fn test_format_line_appends_delimiter_only_when_short() {
        let fields = vec![delimited("a", 5), delimited("b", 3)];
        let mut record = Record::new_named();
        record.set_named("a", Value::from("hi")).unwrap();
        record.set_named("b", Value::from("xyz")).unwrap();

        assert_eq!(format_line(&record, &fields).unwrap(), "hi,xyz");
    }

    #[test]
    fn test_code_point_widths() {
        let field = fixed("n", 4);
        // three code points, more than three bytes
        assert_eq!(format_field(&field, &Value::from("héé")).unwrap(), "0héé");

        let fields = vec![fixed("n", 4)];
        let parsed = parse_line("0héé", &fields).unwrap();
        assert_eq!(parsed["n"], "0héé");
    }

    #[test]
    fn test_parse_format_round_trip() {
        let fields = vec![fixed("id", 4), delimited("name", 8), fixed("flag", 1)];
        let mut record = Record::new_named();
        record.set_named("id", Value::Integer(42)).unwrap();
        record.set_named("name", Value::from("ada")).unwrap();
        record.set_named("flag", Value::Boolean(true)).unwrap();

        let line = format_line(&record, &fields).unwrap();
        assert_eq!(line, "0042ada,1");

        let parsed = parse_line(&line, &fields).unwrap();
        assert_eq!(parsed["id"], "0042");
        assert_eq!(parsed["name"], "ada");
        assert_eq!(parsed["flag"], "1");
    }
}
