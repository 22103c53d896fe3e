//! Polars SQL client over the two CSV datasets.
//!
//! The CSVs are scanned once at construction; every query gets a fresh
//! `SQLContext` with `trades` and `holdings` registered, so nothing is shared
//! mutably and no write path exists.

use crate::error::{QueryError, Result};
use crate::execution::engine::QueryClient;
use crate::execution::result::QueryOutcome;
use async_trait::async_trait;
use polars::prelude::*;
use polars::sql::SQLContext;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

pub struct PolarsClient {
    trades: LazyFrame,
    holdings: LazyFrame,
}

impl PolarsClient {
    /// Opens the trades and holdings CSV files.
    pub fn open(trades_csv: &Path, holdings_csv: &Path) -> Result<Self> {
        let trades = scan_csv(trades_csv)?;
        let holdings = scan_csv(holdings_csv)?;
        info!(
            "Registered views trades ({}) and holdings ({})",
            trades_csv.display(),
            holdings_csv.display()
        );
        Ok(Self { trades, holdings })
    }

    /// Builds a client from in-memory frames.
    pub fn from_frames(trades: DataFrame, holdings: DataFrame) -> Self {
        Self {
            trades: trades.lazy(),
            holdings: holdings.lazy(),
        }
    }

    fn execute(&self, sql: &str) -> Result<DataFrame> {
        let start_time = Instant::now();

        let mut ctx = SQLContext::new();
        ctx.register("trades", self.trades.clone());
        ctx.register("holdings", self.holdings.clone());

        let df = ctx
            .execute(sql)
            .and_then(|lf| lf.collect())
            .map_err(|e| QueryError::Execution(e.to_string()))?;

        debug!(
            "Query returned {} row(s) in {}ms",
            df.height(),
            start_time.elapsed().as_millis()
        );
        Ok(df)
    }
}

fn scan_csv(path: &Path) -> Result<LazyFrame> {
    if !path.exists() {
        return Err(QueryError::Config(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }
    LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .finish()
        .map_err(|e| QueryError::Execution(format!("Failed to load CSV {}: {}", path.display(), e)))
}

#[async_trait]
impl QueryClient for PolarsClient {
    fn name(&self) -> &'static str {
        "polars"
    }

    async fn run_sql(&self, sql: &str) -> Result<QueryOutcome> {
        let df = self.execute(sql)?;
        QueryOutcome::from_dataframe(&df)
    }

    async fn query_frame(&self, sql: &str) -> Result<DataFrame> {
        self.execute(sql)
    }
}
