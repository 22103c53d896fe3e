//! SQL Validator / Safety Gate
//!
//! Two independent gates run before any candidate reaches the data client:
//! structural validation (shape and policy) and the read-only safety
//! assertion (blocked keywords).

use crate::error::{QueryError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Views the validator accepts.
pub const KNOWN_TABLES: [&str; 2] = ["trades", "holdings"];

/// Date columns whose contents are unusable in the source data.
pub const CORRUPT_COLUMNS: [&str; 2] = ["tradedate", "settledate"];

pub const CLAUSE_ORDER_HINT: &str =
    "Correct order: SELECT → FROM → WHERE → GROUP BY → HAVING → ORDER BY → LIMIT";

lazy_static! {
    static ref FROM_CLAUSE: Regex = Regex::new(r"\bfrom\b").expect("valid regex");
    static ref KNOWN_TABLE: Regex = Regex::new(r"\b(?:trades|holdings)\b").expect("valid regex");
    static ref LIMIT_KEYWORD: Regex = Regex::new(r"(?i)\blimit\b").expect("valid regex");
    static ref GROUP_BY: Regex = Regex::new(r"\bgroup\s+by\b").expect("valid regex");
    static ref ORDER_BY: Regex = Regex::new(r"\border\s+by\b").expect("valid regex");
    static ref BLOCKED_SQL: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|truncate|create|grant|revoke)\b"
    )
    .expect("valid regex");
}

/// Result of structural validation: `ok` plus the first failing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlValidation {
    pub ok: bool,
    pub reason: Option<String>,
}

impl SqlValidation {
    fn pass() -> Self {
        Self { ok: true, reason: None }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.reason {
            Some(reason) if !self.ok => Err(QueryError::ValidationFailed(reason)),
            _ => Ok(()),
        }
    }
}

/// Structural validation. Rules run in order and the first failure wins.
pub fn validate_sql(sql: &str) -> SqlValidation {
    let sql_lower = sql.trim().to_lowercase();

    if sql_lower.is_empty() {
        return SqlValidation::fail("Empty SQL query");
    }

    if !sql_lower.starts_with("select") {
        return SqlValidation::fail("Only SELECT queries are allowed");
    }

    if !FROM_CLAUSE.is_match(&sql_lower) {
        return SqlValidation::fail("Query must include a FROM clause");
    }

    if !KNOWN_TABLE.is_match(&sql_lower) {
        return SqlValidation::fail("Query must reference 'holdings' or 'trades' table");
    }

    if CORRUPT_COLUMNS.iter().any(|c| sql_lower.contains(c)) {
        return SqlValidation::fail(
            "TradeDate and SettleDate columns have invalid data. Avoid using them.",
        );
    }

    if !parentheses_balanced(sql) {
        return SqlValidation::fail("Unmatched parentheses in query");
    }

    if let Some(limit_pos) = LIMIT_KEYWORD.find(&sql_lower).map(|m| m.start()) {
        if let Some(group_pos) = GROUP_BY.find(&sql_lower).map(|m| m.start()) {
            if limit_pos < group_pos {
                return SqlValidation::fail(format!(
                    "Invalid SQL: LIMIT must come after GROUP BY. {}",
                    CLAUSE_ORDER_HINT
                ));
            }
        }
        if let Some(order_pos) = ORDER_BY.find(&sql_lower).map(|m| m.start()) {
            if limit_pos < order_pos {
                return SqlValidation::fail(format!(
                    "Invalid SQL: LIMIT must come after ORDER BY. {}",
                    CLAUSE_ORDER_HINT
                ));
            }
        }
    }

    SqlValidation::pass()
}

fn parentheses_balanced(sql: &str) -> bool {
    let mut depth: i64 = 0;
    for c in sql.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Read-only assertion: rejects any blocked keyword appearing as a whole word.
pub fn assert_safe(sql: &str) -> Result<()> {
    match BLOCKED_SQL.find(sql) {
        Some(m) => Err(QueryError::UnsafeSql(m.as_str().to_uppercase())),
        None => Ok(()),
    }
}

/// True when the text carries a LIMIT keyword anywhere.
pub fn has_limit(sql: &str) -> bool {
    LIMIT_KEYWORD.is_match(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(sql: &str) -> String {
        validate_sql(sql).reason.unwrap_or_default()
    }

    #[test]
    fn test_rejects_non_select() {
        let v = validate_sql("DELETE FROM trades");
        assert!(!v.ok);
        assert_eq!(v.reason.as_deref(), Some("Only SELECT queries are allowed"));
    }

    #[test]
    fn test_rejects_unknown_table() {
        assert!(reason("SELECT * FROM foo").contains("'holdings' or 'trades'"));
    }

    #[test]
    fn test_rejects_limit_before_group_by() {
        let v = validate_sql("SELECT * FROM holdings LIMIT 5 GROUP BY X");
        assert!(!v.ok);
        assert!(reason("SELECT * FROM holdings LIMIT 5 GROUP BY X").contains("GROUP BY"));
    }

    #[test]
    fn test_rejects_limit_before_order_by() {
        assert!(reason("SELECT * FROM trades LIMIT 5 ORDER BY id").contains("ORDER BY"));
    }

    #[test]
    fn test_rule_order_short_circuits() {
        assert_eq!(reason(""), "Empty SQL query");
        assert_eq!(reason("   "), "Empty SQL query");
        assert_eq!(reason("SELECT 1"), "Query must include a FROM clause");
        assert!(reason("SELECT TradeDate FROM trades").contains("TradeDate"));
        assert_eq!(
            reason("SELECT SUM(Qty FROM holdings"),
            "Unmatched parentheses in query"
        );
        assert_eq!(
            reason("SELECT Qty) FROM holdings (WHERE"),
            "Unmatched parentheses in query"
        );
    }

    #[test]
    fn test_accepts_well_formed_query() {
        let sql = "select PortfolioName, count(*) from trades\ngroup by PortfolioName\norder by 2 desc\nlimit 10";
        let v = validate_sql(sql);
        assert!(v.ok, "{:?}", v.reason);
        assert!(v.into_result().is_ok());
    }

    #[test]
    fn test_into_result_maps_failure() {
        let err = validate_sql("SELECT * FROM foo").into_result().unwrap_err();
        assert!(matches!(err, QueryError::ValidationFailed(_)));
    }

    #[test]
    fn test_assert_safe_blocks_whole_words() {
        for sql in [
            "DROP TABLE trades",
            "select * from trades; delete from trades",
            "SELECT * FROM holdings WHERE x = 1 OR 1=1; Update holdings SET Qty = 0",
            "grant all on trades to public",
            "SELECT * FROM trades;\nTRUNCATE holdings",
        ] {
            assert!(
                matches!(assert_safe(sql), Err(QueryError::UnsafeSql(_))),
                "should block: {sql}"
            );
        }
    }

    #[test]
    fn test_assert_safe_allows_identifier_substrings() {
        assert!(assert_safe("SELECT * FROM holdings WHERE PortfolioName = 'UPDATEX'").is_ok());
        assert!(assert_safe("SELECT created_at, dropped FROM trades").is_ok());
        assert!(assert_safe("SELECT * FROM holdings").is_ok());
    }

    #[test]
    fn test_has_limit() {
        assert!(has_limit("SELECT * FROM holdings\nlimit 3"));
        assert!(!has_limit("SELECT unlimited FROM holdings"));
    }
}
