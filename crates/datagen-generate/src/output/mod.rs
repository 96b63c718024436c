//! Writers for generated data.

pub mod csv;
pub mod json;
pub mod ndjson;

pub use self::csv::{write_collection_csv, write_dataset_csv};
pub use self::json::write_dataset_json;
pub use self::ndjson::NdjsonWriter;
