//! Rowflow - declarative, distributed ETL
//!
//! Rowflow streams rows out of primary tabular sources, decorates each row by
//! joining against additional sources, projects the joined rows through a
//! `select` list and writes the results to one or more destinations. The three
//! phases are decoupled through durable Kafka topics so extraction,
//! transformation and loading scale independently.

pub mod rowflow;

// Re-export main API
pub use rowflow::broker::{EtlConsumer, EtlProducer};
pub use rowflow::cache::KeyValueCache;
pub use rowflow::datasource::{DataAccessor, DataSource, Request};
pub use rowflow::engine::{Extractor, Loader, Transformed, Transformer};
pub use rowflow::error::{EtlError, EtlResult};
pub use rowflow::metadata::{parse_metadata, Metadata};
pub use rowflow::record::{Record, Value};
