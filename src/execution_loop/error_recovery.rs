//! Error Recovery
//!
//! Textual rewrites for the two auto-repairable error classes, plus the row
//! cap applied before execution. Rewrites act on the whole candidate, not
//! only on the column that failed.

use crate::execution_loop::error_classifier::SqlErrorClass;
use crate::validation::has_limit;
use lazy_static::lazy_static;
use regex::Regex;

/// Columns that are numeric in meaning but sometimes loaded as text.
pub const TEXTUAL_NUMERIC_COLUMNS: [&str; 5] = ["MV_Base", "MV_Local", "PL_YTD", "PL_MTD", "PL_DTD"];

const AGGREGATES: [&str; 4] = ["SUM", "AVG", "MIN", "MAX"];

lazy_static! {
    // `\b` does not fire between `_` and `C`, so TRY_CAST( is left alone
    static ref STRICT_CAST: Regex = Regex::new(r"(?i)\bcast\s*\(").expect("valid regex");
}

/// Replaces every strict `CAST(` with `TRY_CAST(`.
pub fn apply_permissive_casts(sql: &str) -> String {
    STRICT_CAST.replace_all(sql, "TRY_CAST(").into_owned()
}

/// Wraps aggregate and ORDER BY uses of the textual-numeric columns in
/// `TRY_CAST(... AS DOUBLE)`.
pub fn cast_textual_numeric_columns(sql: &str) -> String {
    let mut rewritten = sql.to_string();
    for col in TEXTUAL_NUMERIC_COLUMNS {
        let cast = format!("TRY_CAST({} AS DOUBLE)", col);
        for agg in AGGREGATES {
            rewritten = rewritten.replace(&format!("{}({})", agg, col), &format!("{}({})", agg, cast));
        }
        rewritten = rewritten.replace(&format!("ORDER BY {}", col), &format!("ORDER BY {}", cast));
    }
    rewritten
}

/// Appends `LIMIT cap` unless the candidate already has a LIMIT keyword.
pub fn apply_row_cap(sql: &str, cap: usize) -> String {
    if has_limit(sql) {
        return sql.to_string();
    }
    let base = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{} LIMIT {}", base, cap)
}

/// Rewrite builder keyed on error class
pub struct ErrorRecovery;

impl ErrorRecovery {
    pub fn new() -> Self {
        Self
    }

    /// The rewritten candidate, or `None` when the class has no automatic fix.
    pub fn rewrite(&self, error_class: &SqlErrorClass, sql: &str) -> Option<String> {
        match error_class {
            SqlErrorClass::TypeConversion => Some(apply_permissive_casts(sql)),
            SqlErrorClass::TypeMismatch => Some(cast_textual_numeric_columns(sql)),
            SqlErrorClass::Validation(_) | SqlErrorClass::Unsafe(_) | SqlErrorClass::Other(_) => {
                None
            }
        }
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new()
    }
}
