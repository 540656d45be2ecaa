//! Export engine: job pipeline, extraction worker, retention policy, and
//! the integrity ledger.

pub mod integrity;
pub mod pipeline;
pub mod retention;
pub mod worker;

pub use pipeline::ExportPipeline;
pub use worker::ExportWorker;
