//! Data generation for datagen schemas.
//!
//! Consumes a validated DSL tree and produces a deterministic dataset:
//! eagerly, with lazily materialized items, or one collection streamed item
//! by item.

pub mod context;
pub mod dataset;
pub mod engine;
pub mod errors;
mod evaluator;
pub mod filtering;
pub mod generators;
pub mod lazy;
pub mod model;
pub mod output;
pub mod params;
pub mod streaming;

pub use dataset::{Dataset, DatasetCollection};
pub use engine::{GenerationEngine, GenerationResult, LazyGeneration};
pub use errors::GenerationError;
pub use filtering::{FilterOutcome, retry_filter};
pub use generators::{FieldSupplier, Generator, GeneratorContext, GeneratorRegistry};
pub use lazy::{ItemRef, LazyItem};
pub use model::{
    CollectionReport, DEFAULT_MAX_FILTERING_RETRIES, FilteringBehavior, GenerateOptions,
    GenerationIssue, GenerationReport,
};
pub use streaming::{ItemStream, StreamingGeneration};
