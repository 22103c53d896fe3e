//! Execution Module - data collaborator contract, results and the Polars
//! SQL client.

pub mod engine;
pub mod polars_engine;
pub mod result;

pub use engine::QueryClient;
pub use polars_engine::PolarsClient;
pub use result::{QueryOutcome, ResultPayload};
