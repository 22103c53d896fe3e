//! Fallback Generator
//!
//! Natural-language-to-SQL through an external [`TextGenerator`], used only
//! when no template matches. Generation has its own bounded retry budget:
//! each attempt's output is sanitized and pushed through the same gates as
//! execution, and the failure reason is fed back into the next attempt.

use crate::config::DEFAULT_GENERATION_ATTEMPTS;
use crate::history::ConversationHistory;
use crate::llm::TextGenerator;
use crate::validation::{assert_safe, validate_sql, CLAUSE_ORDER_HINT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns of history included as context.
pub const HISTORY_CONTEXT_TURNS: usize = 3;

pub const SCHEMA_INFO: &str = r#"
# Database Schema

## Table: holdings
Portfolio positions snapshot

Columns:
- PortfolioName (TEXT): Name of the portfolio (e.g., 'Garfield', 'Heather', 'MNC Investment Fund')
- SecurityId (INTEGER): Unique security identifier
- SecName (TEXT): Security name/identifier string
- SecurityTypeName (TEXT): Type of security (e.g., 'Bond', 'Equity', 'AssetBacked')
- Qty (DOUBLE): Quantity held
- Price (DOUBLE): Current price
- MV_Base (DOUBLE): Market value in base currency (USD)
- MV_Local (DOUBLE): Market value in local currency
- PL_YTD (DOUBLE): Year-to-date profit/loss
- PL_MTD (DOUBLE): Month-to-date profit/loss
- PL_DTD (DOUBLE): Day-to-date profit/loss

## Table: trades
Transaction events

Columns:
- id (INTEGER): Unique trade identifier
- PortfolioName (TEXT): Portfolio name
- SecurityId (INTEGER): Security identifier
- SecurityType (TEXT): Type of security
- Name (TEXT): Security name
- TradeTypeName (TEXT): Type of trade (e.g., 'Buy', 'Sell')
- Quantity (DOUBLE): Trade quantity
- Price (DOUBLE): Trade price
- Principal (DOUBLE): Principal amount
- TotalCash (DOUBLE): Total cash amount
- AllocationQTY (DOUBLE): Allocated quantity
- AllocationCash (DOUBLE): Allocated cash amount
- TradeDate (TEXT): Trade date (NOTE: invalid in this dataset)
- SettleDate (TEXT): Settlement date (NOTE: invalid in this dataset)

## Data Catalog - Column Name Mappings

| User Says | Actual Column | Table |
|-----------|---------------|-------|
| portfolio, fund, account | PortfolioName | both |
| security, stock, bond, asset, instrument | SecurityId, SecName, Name | both |
| security type, asset class, type | SecurityTypeName (holdings), SecurityType (trades) | both |
| quantity, shares, units, amount | Qty (holdings), Quantity (trades) | both |
| price, value per unit | Price | both |
| market value, mv, value, worth | MV_Base | holdings |
| local value, local mv | MV_Local | holdings |
| pnl, p&l, profit, loss, gain, return | PL_YTD, PL_MTD, PL_DTD | holdings |
| ytd, year to date | PL_YTD | holdings |
| mtd, month to date | PL_MTD | holdings |
| dtd, day to date, today | PL_DTD | holdings |
| trade type, buy, sell, action | TradeTypeName | trades |
| principal, notional | Principal | trades |
| cash, total cash | TotalCash | trades |
| allocation | AllocationQTY, AllocationCash | trades |

## Important Notes:
- Both tables exist as views in the database
- TradeDate and SettleDate columns have invalid data - avoid using them
"#;

const QUERY_EXAMPLES: &str = r#"QUERY PATTERNS:
- "how many X per Y" → SELECT Y, COUNT(*) FROM table GROUP BY Y
- "top N X by Y" → SELECT ... FROM table ORDER BY Y DESC LIMIT N
- "total/sum of X" → SELECT SUM(X) FROM table
- "X for portfolio Y" → SELECT ... FROM table WHERE PortfolioName = 'Y'
- "list all X" → SELECT DISTINCT X FROM table

EXAMPLES:

Q: How many trades per portfolio?
SELECT PortfolioName, COUNT(*) as NumTrades FROM trades GROUP BY PortfolioName ORDER BY NumTrades DESC

Q: Top 10 holdings by market value
SELECT PortfolioName, SecName, MV_Base FROM holdings ORDER BY MV_Base DESC LIMIT 10

Q: Total market value by portfolio
SELECT PortfolioName, SUM(MV_Base) as TotalMV FROM holdings GROUP BY PortfolioName ORDER BY TotalMV DESC

Q: Holdings for Garfield portfolio
SELECT SecName, SecurityTypeName, Qty, MV_Base, PL_YTD FROM holdings WHERE PortfolioName = 'Garfield'

Q: Largest trades
SELECT PortfolioName, Name, TradeTypeName, Quantity, Principal FROM trades ORDER BY Principal DESC LIMIT 10

Q: Average P&L by security type
SELECT SecurityTypeName, AVG(PL_YTD) as AvgPnL, COUNT(*) as Count FROM holdings GROUP BY SecurityTypeName ORDER BY AvgPnL DESC"#;

/// System prompt handed to the external generator.
pub fn system_prompt() -> String {
    format!(
        "You are an expert SQL query generator. Your ONLY job is to output a valid SQL query.

CRITICAL RULES:
1. Output ONLY the SQL query - no explanations, no markdown, no code fences
2. Use ONLY these tables: holdings, trades
3. NEVER use TradeDate or SettleDate columns (they have invalid data)
4. ALWAYS put clauses in this order: SELECT → FROM → WHERE → GROUP BY → HAVING → ORDER BY → LIMIT
5. Only add LIMIT if the user explicitly asks for a specific number (e.g., \"top 10\", \"first 5\")
{}
{}

Now generate SQL for the user's question. Output ONLY the SQL query, nothing else.",
        SCHEMA_INFO, QUERY_EXAMPLES
    )
}

/// SQL produced by the fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub attempts: u8,
}

/// Strategy the planner calls when no template matches. `prior_error` carries
/// an execution failure from an earlier candidate for the same question.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        history: &ConversationHistory,
        prior_error: Option<&str>,
    ) -> Option<GeneratedSql>;
}

pub struct FallbackGenerator {
    generator: Arc<dyn TextGenerator>,
    max_attempts: u8,
}

impl FallbackGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self::with_attempts(generator, DEFAULT_GENERATION_ATTEMPTS)
    }

    pub fn with_attempts(generator: Arc<dyn TextGenerator>, max_attempts: u8) -> Self {
        Self {
            generator,
            max_attempts: max_attempts.max(1),
        }
    }

    fn build_context(
        question: &str,
        history: &ConversationHistory,
        last_error: Option<&str>,
    ) -> String {
        let mut parts = Vec::new();

        let conversation: Vec<String> = history
            .recent(HISTORY_CONTEXT_TURNS)
            .flat_map(|turn| {
                let mut lines = vec![format!("User: {}", turn.question)];
                if let Some(sql) = &turn.sql {
                    lines.push(format!("SQL: {}", sql));
                }
                lines
            })
            .collect();
        if !conversation.is_empty() {
            parts.push(format!("## Previous Conversation:\n{}", conversation.join("\n")));
        }

        parts.push(format!("## Current Question:\n{}", question));

        if let Some(error) = last_error {
            parts.push(format!(
                "\n## Error from previous attempt:\n{}\nFix the issue. Remember: LIMIT must come AFTER GROUP BY and ORDER BY. {}",
                error, CLAUSE_ORDER_HINT
            ));
        }

        parts.join("\n\n")
    }
}

#[async_trait]
impl FallbackStrategy for FallbackGenerator {
    async fn generate(
        &self,
        question: &str,
        history: &ConversationHistory,
        prior_error: Option<&str>,
    ) -> Option<GeneratedSql> {
        let system = system_prompt();
        let mut last_error: Option<String> = prior_error.map(str::to_string);

        for attempt in 1..=self.max_attempts {
            let context = Self::build_context(question, history, last_error.as_deref());

            let raw = match self
                .generator
                .generate_text(question, &context, Some(&system))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Generation attempt {}/{} error: {}", attempt, self.max_attempts, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let sql = sanitize_generated_sql(&raw);
            let verdict = validate_sql(&sql);
            let failure = match verdict.reason {
                Some(reason) if !verdict.ok => Some(reason),
                _ => assert_safe(&sql).err().map(|e| e.to_string()),
            };

            if let Some(reason) = failure {
                warn!(
                    "Generation attempt {}/{} failed: {}",
                    attempt, self.max_attempts, reason
                );
                last_error = Some(reason);
                continue;
            }

            if attempt > 1 {
                info!("Generated valid SQL on attempt {}/{}", attempt, self.max_attempts);
            }
            return Some(GeneratedSql { sql, attempts: attempt });
        }

        warn!(
            "Failed to generate SQL after {} attempts. Last error: {}",
            self.max_attempts,
            last_error.as_deref().unwrap_or("none")
        );
        None
    }
}

/// Strips code fences, a leading language tag and SQL comments, then
/// collapses whitespace.
pub fn sanitize_generated_sql(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        // drop the opening fence line, with or without a language tag
        text = match text.find('\n') {
            Some(idx) => &text[idx + 1..],
            None => text.trim_start_matches('`'),
        };
        text = text.trim_end();
        if let Some(stripped) = text.strip_suffix("```") {
            text = stripped;
        }
        text = text.trim();
    }

    if let Some(rest) = text
        .get(..3)
        .filter(|tag| tag.eq_ignore_ascii_case("sql"))
        .and_then(|_| text.get(3..))
        .filter(|rest| rest.starts_with(char::is_whitespace))
    {
        text = rest;
    }

    strip_sql_comments(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replaces `--` and `/* */` comments with a space. String literals are left
/// untouched; text the tokenizer rejects is returned as is.
fn strip_sql_comments(sql: &str) -> String {
    let tokens = match Tokenizer::new(&GenericDialect {}, sql)
        .with_unescape(false)
        .tokenize()
    {
        Ok(tokens) => tokens,
        Err(e) => {
            debug!("Leaving generated SQL as is, tokenizer failed: {}", e);
            return sql.to_string();
        }
    };

    tokens
        .into_iter()
        .map(|token| match token {
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => " ".to_string(),
            other => other.to_string(),
        })
        .collect()
}
