//! Datasource drivers and accessors.

pub mod accessor;
pub mod plaintext;
pub mod request;
pub mod traits;

pub use accessor::{accessor_for, DataAccessor, HttpDataAccessor, LocalDataAccessor};
pub use plaintext::PlainTextDataSource;
pub use request::Request;
pub use traits::{ConnectionMode, DataSource};

use crate::rowflow::error::{EtlError, EtlResult};
use crate::rowflow::metadata::DataEndpoint;

/// Instantiate the driver named by an endpoint
pub fn open_datasource(endpoint: &DataEndpoint) -> EtlResult<Box<dyn DataSource>> {
    match endpoint.driver.as_str() {
        "plaintext" => {
            let source: Box<dyn DataSource> = Box::new(PlainTextDataSource::new(endpoint)?);
            Ok(source)
        }
        other => Err(EtlError::unknown_data_source(
            other,
            "no datasource driver registered under that name",
        )),
    }
}
