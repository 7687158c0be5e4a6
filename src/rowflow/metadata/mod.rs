//! Typed representation of an ETL job description.
//!
//! A job is described in YAML with four top-level keys: `version`, `extract`
//! (primary and additional datasources), `transform` (per-transformation join
//! and select rules) and `load` (destinations). Parsing is strict: unknown
//! keys fail.

pub mod clauses;
pub mod field;

pub use clauses::{OnClause, SelectClause};
pub use field::{Field, FieldType, Padding, PaddingMode};

use crate::rowflow::error::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single tabular source or sink reachable through a driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataEndpoint {
    pub driver: String,
    pub connection_string: String,
    pub object_identifier: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Remote accessor address; when set, joins go through HTTP instead of a
    /// local driver
    #[serde(default)]
    pub accessor_url: Option<String>,
}

impl DataEndpoint {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn find_field(&self, name: &str) -> EtlResult<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| {
                EtlError::missing_field(
                    name,
                    format!("fields of datasource '{}'", self.object_identifier),
                )
            })
    }
}

/// A join from one transformation alias to an additional datasource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Join {
    pub to: String,
    #[serde(default)]
    pub on: Vec<OnClause>,
}

/// Join and projection rules applied to every row of one primary source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataTransformation {
    pub from: String,
    #[serde(default)]
    pub joins: HashMap<String, Join>,
    /// Reserved; never evaluated. A non-empty list is rejected at load time.
    #[serde(default, rename = "where")]
    pub where_clauses: Vec<String>,
    pub select: HashMap<String, SelectClause>,
}

/// A load destination: an endpoint plus the transformation feeding it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DataDestination {
    pub driver: String,
    pub connection_string: String,
    pub object_identifier: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub accessor_url: Option<String>,
    pub transformation_name: String,
}

impl DataDestination {
    /// View of the destination as a plain endpoint
    pub fn endpoint(&self) -> DataEndpoint {
        DataEndpoint {
            driver: self.driver.clone(),
            connection_string: self.connection_string.clone(),
            object_identifier: self.object_identifier.clone(),
            fields: self.fields.clone(),
            accessor_url: self.accessor_url.clone(),
        }
    }
}

/// The extract section: streamed primaries and filter-queried additionals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extract {
    #[serde(default)]
    pub primary: HashMap<String, DataEndpoint>,
    #[serde(default)]
    pub additional: HashMap<String, DataEndpoint>,
}

/// A complete job description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub version: String,
    pub extract: Extract,
    #[serde(default)]
    pub transform: HashMap<String, DataTransformation>,
    #[serde(default)]
    pub load: HashMap<String, DataDestination>,
}

impl Metadata {
    /// Cross-check the job: field shapes, transformation references, clause
    /// syntax and destination routing. Called by [`parse_metadata`].
    pub fn check(&self) -> EtlResult<()> {
        for endpoint in self
            .extract
            .primary
            .values()
            .chain(self.extract.additional.values())
        {
            for field in &endpoint.fields {
                field.check()?;
            }
        }
        for destination in self.load.values() {
            for field in &destination.fields {
                field.check()?;
            }
        }

        for (name, transformation) in &self.transform {
            if !self.extract.primary.contains_key(&transformation.from) {
                return Err(EtlError::bad_metadata(format!(
                    "transformation '{}' reads from unknown primary datasource '{}'",
                    name, transformation.from
                )));
            }
            if !transformation.where_clauses.is_empty() {
                return Err(EtlError::bad_metadata(format!(
                    "transformation '{}' uses 'where', which is reserved and not evaluated",
                    name
                )));
            }
            for (alias, join) in &transformation.joins {
                if !self.extract.additional.contains_key(&join.to) {
                    return Err(EtlError::unknown_data_source(
                        join.to.clone(),
                        format!("join '{}' of transformation '{}' targets it", alias, name),
                    ));
                }
                for on_clause in &join.on {
                    let (left, right) = on_clause.parse()?;
                    left.parse()?;
                    right.parse()?;
                }
            }
            for clause in transformation.select.values() {
                clause.parse()?;
            }
        }

        for (name, destination) in &self.load {
            if !self.transform.contains_key(&destination.transformation_name) {
                return Err(EtlError::bad_metadata(format!(
                    "destination '{}' loads unknown transformation '{}'",
                    name, destination.transformation_name
                )));
            }
        }
        Ok(())
    }
}

/// Deserialize and cross-check a YAML job description
pub fn parse_metadata(text: &str) -> EtlResult<Metadata> {
    let metadata: Metadata = serde_yaml::from_str(text)?;
    metadata.check()?;
    Ok(metadata)
}
