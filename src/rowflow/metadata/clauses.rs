//! Select and join clause parsing.

use crate::rowflow::error::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `"<alias>.<field>"` reference naming the origin of a projected value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectClause(pub String);

impl SelectClause {
    /// Split into `(alias, field)`; exactly one `.` separator is required
    pub fn parse(&self) -> EtlResult<(String, String)> {
        let parts: Vec<&str> = self.0.split('.').collect();
        if parts.len() != 2 {
            return Err(EtlError::bad_metadata(format!(
                "cannot split select clause '{}'",
                self.0
            )));
        }
        Ok((parts[0].trim().to_string(), parts[1].trim().to_string()))
    }
}

impl fmt::Display for SelectClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `"<left> = <right>"` equality predicate between two select clauses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OnClause(pub String);

impl OnClause {
    /// Split into the two sides; exactly one `=` separator is required
    pub fn parse(&self) -> EtlResult<(SelectClause, SelectClause)> {
        let parts: Vec<&str> = self.0.split('=').collect();
        if parts.len() != 2 {
            return Err(EtlError::bad_metadata(format!(
                "cannot split on clause '{}'",
                self.0
            )));
        }
        Ok((
            SelectClause(parts[0].trim().to_string()),
            SelectClause(parts[1].trim().to_string()),
        ))
    }
}

impl fmt::Display for OnClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_clause_parse() {
        let (alias, field) = SelectClause("users.name".to_string()).parse().unwrap();
        assert_eq!(alias, "users");
        assert_eq!(field, "name");
    }

    #[test]
    fn test_select_clause_trims_whitespace() {
        let (alias, field) = SelectClause(" users . name ".to_string()).parse().unwrap();
        assert_eq!(alias, "users");
        assert_eq!(field, "name");
    }

    #[test]
    fn test_select_clause_requires_single_separator() {
        assert!(SelectClause("users".to_string()).parse().is_err());
        assert!(SelectClause("a.b.c".to_string()).parse().is_err());
    }

    #[test]
    fn test_on_clause_parse() {
        let (left, right) = OnClause("p.uid = users.id".to_string()).parse().unwrap();
        assert_eq!(left.parse().unwrap(), ("p".to_string(), "uid".to_string()));
        assert_eq!(
            right.parse().unwrap(),
            ("users".to_string(), "id".to_string())
        );
    }

    #[test]
    fn test_on_clause_requires_single_separator() {
        assert!(OnClause("a.b".to_string()).parse().is_err());
        assert!(OnClause("a.b = c.d = e.f".to_string()).parse().is_err());
    }
}
