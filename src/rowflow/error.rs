use std::fmt;

/// Errors that can occur while running an ETL job
#[derive(Debug, Clone, PartialEq)]
pub enum EtlError {
    /// Job description parsing or consistency errors
    BadMetadata { message: String },

    /// Record parsing or validation errors
    BadRecord {
        message: String,
        record_id: Option<String>,
    },

    /// A value does not fit its field's declared width
    FieldTooLong {
        field: String,
        limit: usize,
        actual: usize,
    },

    /// A referenced field is absent from a record or endpoint
    MissingField { field: String, context: String },

    /// A named datasource or destination is not known to the job
    UnknownDataSource { name: String, message: String },

    /// A remote accessor call failed
    AccessorFailed { url: String, message: String },

    /// Cache tier failure; warning-level, callers log and continue
    CacheFailed { key: String, message: String },

    /// Internal sentinel: a join's dependencies are not resolved yet.
    /// Never escapes the transformer's fixed-point loop.
    TemporaryUnavailableJoin { alias: String },

    /// The join graph of a transformation cannot be resolved
    UnsatisfiableJoins {
        transformation: String,
        missing: Vec<String>,
    },

    /// An operation was cancelled or timed out
    Cancelled { operation: String },

    /// Underlying I/O errors, wrapped with context
    Io { context: String, message: String },
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtlError::BadMetadata { message } => {
                write!(f, "metadata error: {}", message)
            }
            EtlError::BadRecord { message, record_id } => {
                if let Some(id) = record_id {
                    write!(f, "record error for GUID {}: {}", id, message)
                } else {
                    write!(f, "record error: {}", message)
                }
            }
            EtlError::FieldTooLong {
                field,
                limit,
                actual,
            } => {
                write!(
                    f,
                    "field '{}' has a width of {} and the current value is longer ({})",
                    field, limit, actual
                )
            }
            EtlError::MissingField { field, context } => {
                write!(f, "cannot find field '{}' in {}", field, context)
            }
            EtlError::UnknownDataSource { name, message } => {
                write!(f, "unknown datasource '{}': {}", name, message)
            }
            EtlError::AccessorFailed { url, message } => {
                write!(f, "accessor call to {} failed: {}", url, message)
            }
            EtlError::CacheFailed { key, message } => {
                write!(f, "cache operation for key '{}' failed: {}", key, message)
            }
            EtlError::TemporaryUnavailableJoin { alias } => {
                write!(f, "join '{}' is not resolvable yet", alias)
            }
            EtlError::UnsatisfiableJoins {
                transformation,
                missing,
            } => {
                write!(
                    f,
                    "transformation '{}' could not perform every join expected; unresolved keys: {}",
                    transformation,
                    missing.join(", ")
                )
            }
            EtlError::Cancelled { operation } => {
                write!(f, "operation cancelled: {}", operation)
            }
            EtlError::Io { context, message } => {
                write!(f, "i/o error in {}: {}", context, message)
            }
        }
    }
}

impl std::error::Error for EtlError {}

impl EtlError {
    /// Create a metadata error
    pub fn bad_metadata(message: impl Into<String>) -> Self {
        EtlError::BadMetadata {
            message: message.into(),
        }
    }

    /// Create a record error
    pub fn bad_record(message: impl Into<String>, record_id: Option<String>) -> Self {
        EtlError::BadRecord {
            message: message.into(),
            record_id,
        }
    }

    /// Create a field width error
    pub fn field_too_long(field: impl Into<String>, limit: usize, actual: usize) -> Self {
        EtlError::FieldTooLong {
            field: field.into(),
            limit,
            actual,
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        EtlError::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an unknown datasource error
    pub fn unknown_data_source(name: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::UnknownDataSource {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an accessor error
    pub fn accessor_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::AccessorFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a cache error
    pub fn cache_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::CacheFailed {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create the internal join sentinel
    pub fn temporary_unavailable(alias: impl Into<String>) -> Self {
        EtlError::TemporaryUnavailableJoin {
            alias: alias.into(),
        }
    }

    /// Create an unsatisfiable joins error
    pub fn unsatisfiable_joins(
        transformation: impl Into<String>,
        missing: Vec<String>,
    ) -> Self {
        EtlError::UnsatisfiableJoins {
            transformation: transformation.into(),
            missing,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        EtlError::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an I/O error with context
    pub fn io(context: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Io {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for EtlError {
    fn from(err: serde_yaml::Error) -> Self {
        EtlError::bad_metadata(err.to_string())
    }
}

impl From<serde_json::Error> for EtlError {
    fn from(err: serde_json::Error) -> Self {
        EtlError::bad_record(err.to_string(), None)
    }
}

/// Result type for ETL operations
pub type EtlResult<T> = Result<T, EtlError>;
