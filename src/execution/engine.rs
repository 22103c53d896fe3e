//! Data collaborator contract.
//!
//! The core needs two capabilities from a data store: run SQL and get
//! columns/rows back, or run SQL and get a tabular frame back.

use crate::error::Result;
use crate::execution::result::QueryOutcome;
use async_trait::async_trait;
use polars::prelude::DataFrame;

#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Client name for logs (e.g. "polars")
    fn name(&self) -> &'static str;

    /// Run SQL, return column names and row tuples
    async fn run_sql(&self, sql: &str) -> Result<QueryOutcome>;

    /// Run SQL, return a tabular frame
    async fn query_frame(&self, sql: &str) -> Result<DataFrame>;
}
