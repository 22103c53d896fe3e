//! Query results: the internal [`QueryOutcome`] and the caller-facing
//! [`ResultPayload`].

use crate::error::{QueryError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Columns and rows returned by a successful execution.
///
/// `row_count == rows.len()` and every row has `columns.len()` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
    row_count: usize,
}

impl QueryOutcome {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(QueryError::Execution(format!(
                "Row {} has {} values but the result has {} columns",
                idx,
                row.len(),
                columns.len()
            )));
        }
        let row_count = rows.len();
        Ok(Self {
            columns,
            rows,
            row_count,
        })
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = Vec::with_capacity(df.height());
        for row_idx in 0..df.height() {
            let row = df
                .get_columns()
                .iter()
                .map(|series| series_to_json_value(series, row_idx))
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }

        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<serde_json::Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// The single cell of a 1x1 result.
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }
}

/// Shape handed to callers: `{columns, rows, row_count}` on success and
/// `{error, columns: [], rows: [], row_count: 0}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

impl ResultPayload {
    pub fn success(outcome: QueryOutcome) -> Self {
        Self {
            error: None,
            columns: outcome.columns,
            rows: outcome.rows,
            row_count: outcome.row_count,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn series_to_json_value(series: &Series, row_idx: usize) -> Result<serde_json::Value> {
    let any_val = series
        .get(row_idx)
        .map_err(|e| QueryError::Execution(format!("Failed to get value: {}", e)))?;

    Ok(match any_val {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(b),
        AnyValue::String(s) => serde_json::Value::String(s.to_string()),
        AnyValue::StringOwned(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int16(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int32(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int64(i) => serde_json::Value::Number(i.into()),
        AnyValue::UInt8(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt16(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt32(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt64(u) => serde_json::Value::Number(u.into()),
        AnyValue::Float32(f) => serde_json::Number::from_f64(f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AnyValue::Float64(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        other => serde_json::Value::String(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_rejects_ragged_rows() {
        let err = QueryOutcome::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![json!(1), json!(2)], vec![json!(3)]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Row 1"));
    }

    #[test]
    fn test_outcome_from_dataframe() {
        let df = df![
            "PortfolioName" => ["Garfield", "Heather"],
            "MV_Base" => [10.5, 3.0],
            "NumTrades" => [4i64, 1]
        ]
        .unwrap();
        let outcome = QueryOutcome::from_dataframe(&df).unwrap();
        assert_eq!(outcome.columns(), ["PortfolioName", "MV_Base", "NumTrades"]);
        assert_eq!(outcome.row_count(), 2);
        assert_eq!(outcome.rows()[0], vec![json!("Garfield"), json!(10.5), json!(4)]);
    }

    #[test]
    fn test_scalar() {
        let outcome = QueryOutcome::new(vec!["n".to_string()], vec![vec![json!(42)]]).unwrap();
        assert_eq!(outcome.scalar(), Some(&json!(42)));
        let empty = QueryOutcome::new(vec!["n".to_string()], vec![]).unwrap();
        assert_eq!(empty.scalar(), None);
    }

    #[test]
    fn test_payload_shapes() {
        let ok = ResultPayload::success(
            QueryOutcome::new(vec!["n".to_string()], vec![vec![json!(1)]]).unwrap(),
        );
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value, json!({"columns": ["n"], "rows": [[1]], "row_count": 1}));

        let failed = ResultPayload::failure("boom");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(
            value,
            json!({"error": "boom", "columns": [], "rows": [], "row_count": 0})
        );
        assert!(!failed.is_success());
    }
}
