//! Template Catalog
//!
//! Fixed set of named SQL templates over the `trades` and `holdings` views.
//! Placeholders use `{name}` syntax and are substituted verbatim; string
//! values must pass the allow-list before they reach the SQL text.

use crate::error::{QueryError, Result};
use crate::validation::{assert_safe, validate_sql};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

lazy_static! {
    static ref ALLOWED_TEXT_PARAM: Regex =
        Regex::new(r"^[A-Za-z0-9]+(?: [A-Za-z0-9]+)*$").expect("valid allow-list regex");
}

/// Identity of a template, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    CountTradesByPortfolio,
    TopHoldingsByMv,
    PnlByPortfolio,
    NetTradedQtyBySecurity,
    PortfolioSummary,
    TradesForSecurity,
    HoldingsForPortfolio,
    LargestTrades,
    UniqueSecurities,
    AllocationSummary,
}

impl TemplateId {
    pub const ALL: [TemplateId; 10] = [
        TemplateId::CountTradesByPortfolio,
        TemplateId::TopHoldingsByMv,
        TemplateId::PnlByPortfolio,
        TemplateId::NetTradedQtyBySecurity,
        TemplateId::PortfolioSummary,
        TemplateId::TradesForSecurity,
        TemplateId::HoldingsForPortfolio,
        TemplateId::LargestTrades,
        TemplateId::UniqueSecurities,
        TemplateId::AllocationSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::CountTradesByPortfolio => "count_trades_by_portfolio",
            TemplateId::TopHoldingsByMv => "top_holdings_by_mv",
            TemplateId::PnlByPortfolio => "pnl_by_portfolio",
            TemplateId::NetTradedQtyBySecurity => "net_traded_qty_by_security",
            TemplateId::PortfolioSummary => "portfolio_summary",
            TemplateId::TradesForSecurity => "trades_for_security",
            TemplateId::HoldingsForPortfolio => "holdings_for_portfolio",
            TemplateId::LargestTrades => "largest_trades",
            TemplateId::UniqueSecurities => "unique_securities",
            TemplateId::AllocationSummary => "allocation_summary",
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        TemplateId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| QueryError::UnknownTemplate(s.to_string()))
    }
}

/// Typed parameter value. Absence is expressed by the key missing from a
/// [`ParameterSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Placeholder name -> value, built per question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, ParamValue>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: ParamValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

/// SQL template with metadata
#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub sql: &'static str,
    pub description: &'static str,
    /// Placeholder names, in the order they are declared
    pub parameters: &'static [&'static str],
    pub example_params: ParameterSet,
}

impl Template {
    pub fn name(&self) -> &'static str {
        self.id.as_str()
    }

    pub fn requires(&self, param: &str) -> bool {
        self.parameters.contains(&param)
    }
}

/// Outcome of rendering one template with its example values.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateCheck {
    pub template: TemplateId,
    pub ok: bool,
    pub sql: Option<String>,
    pub error: Option<String>,
}

/// Immutable catalog, built once at startup.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    pub fn standard() -> Self {
        let templates = vec![
            Template {
                id: TemplateId::CountTradesByPortfolio,
                sql: r#"
            SELECT PortfolioName,
                   COUNT(DISTINCT id) as NumTrades,
                   SUM(AllocationQTY) as TotalQty,
                   SUM(ABS(AllocationCash)) as TotalValue
            FROM trades
            GROUP BY PortfolioName
            ORDER BY NumTrades DESC
        "#,
                description: "Count trades grouped by portfolio",
                parameters: &[],
                example_params: ParameterSet::new(),
            },
            Template {
                id: TemplateId::TopHoldingsByMv,
                sql: r#"
            SELECT PortfolioName, SecurityId,
                   Qty,
                   MV_Base
            FROM holdings
            ORDER BY MV_Base DESC
            LIMIT {limit}
        "#,
                description: "Top holdings by market value",
                parameters: &["limit"],
                example_params: ParameterSet::new().with("limit", ParamValue::Int(10)),
            },
            Template {
                id: TemplateId::PnlByPortfolio,
                sql: r#"
            SELECT PortfolioName,
                   SUM(PL_YTD) as YTD_PL,
                   SUM(PL_MTD) as MTD_PL,
                   SUM(PL_DTD) as OneDayPL,
                   SUM(MV_Base) as CurrentMV
            FROM holdings
            GROUP BY PortfolioName
            ORDER BY YTD_PL DESC
        "#,
                description: "P&L summary by portfolio",
                parameters: &[],
                example_params: ParameterSet::new(),
            },
            Template {
                id: TemplateId::NetTradedQtyBySecurity,
                sql: r#"
            SELECT SecurityId, Name, SecurityType,
                   SUM(CASE WHEN TradeTypeName = 'Buy' THEN AllocationQTY
                            WHEN TradeTypeName = 'Sell' THEN -AllocationQTY
                            ELSE 0 END) as NetQty,
                   COUNT(DISTINCT id) as NumTrades
            FROM trades
            GROUP BY SecurityId, Name, SecurityType
            ORDER BY ABS(NetQty) DESC
            LIMIT {limit}
        "#,
                description: "Net traded quantity by security (buys - sells)",
                parameters: &["limit"],
                example_params: ParameterSet::new().with("limit", ParamValue::Int(20)),
            },
            Template {
                id: TemplateId::PortfolioSummary,
                sql: r#"
            SELECT PortfolioName,
                   COUNT(DISTINCT SecurityId) as NumSecurities,
                   COUNT(*) as NumPositions,
                   SUM(MV_Base) as TotalMV,
                   SUM(PL_YTD) as YTD_PL
            FROM holdings
            GROUP BY PortfolioName
            ORDER BY TotalMV DESC
        "#,
                description: "Portfolio summary with counts and totals",
                parameters: &[],
                example_params: ParameterSet::new(),
            },
            Template {
                id: TemplateId::TradesForSecurity,
                sql: r#"
            SELECT id, TradeTypeName, PortfolioName, AllocationQTY,
                   Price, AllocationCash, Counterparty
            FROM trades
            WHERE SecurityId = {security_id}
            ORDER BY id DESC
            LIMIT {limit}
        "#,
                description: "Trades for a specific security",
                parameters: &["security_id", "limit"],
                example_params: ParameterSet::new()
                    .with("security_id", ParamValue::Int(273482))
                    .with("limit", ParamValue::Int(50)),
            },
            Template {
                id: TemplateId::HoldingsForPortfolio,
                sql: r#"
            SELECT SecurityId,
                   Qty,
                   MV_Base,
                   PL_YTD as YTD_PL
            FROM holdings
            WHERE PortfolioName = '{portfolio_name}'
            ORDER BY MV_Base DESC
        "#,
                description: "Holdings for a specific portfolio",
                parameters: &["portfolio_name"],
                example_params: ParameterSet::new()
                    .with("portfolio_name", ParamValue::Text("Garfield".to_string())),
            },
            Template {
                id: TemplateId::LargestTrades,
                sql: r#"
            SELECT id, TradeTypeName, Name, SecurityType,
                   Quantity, Price, Principal, TotalCash, PortfolioName
            FROM trades
            ORDER BY ABS(Principal) DESC
            LIMIT {limit}
        "#,
                description: "Largest trades by principal amount",
                parameters: &["limit"],
                example_params: ParameterSet::new().with("limit", ParamValue::Int(20)),
            },
            Template {
                id: TemplateId::UniqueSecurities,
                sql: r#"
            SELECT COUNT(DISTINCT SecurityId) as UniqueSecurities,
                   COUNT(DISTINCT CASE WHEN CloseDate IS NULL THEN SecurityId END) as OpenSecurities,
                   SecurityTypeName
            FROM holdings
            GROUP BY SecurityTypeName
            ORDER BY UniqueSecurities DESC
        "#,
                description: "Count unique securities by type",
                parameters: &[],
                example_params: ParameterSet::new(),
            },
            Template {
                id: TemplateId::AllocationSummary,
                sql: r#"
            SELECT AllocationRule,
                   COUNT(*) as NumAllocations,
                   SUM(ABS(AllocationCash)) as TotalValue,
                   SUM(CASE WHEN IsCustomAllocation = 1 THEN 1 ELSE 0 END) as CustomCount
            FROM trades
            GROUP BY AllocationRule
            ORDER BY TotalValue DESC
        "#,
                description: "Summary of allocation rules used",
                parameters: &[],
                example_params: ParameterSet::new(),
            },
        ];

        Self { templates }
    }

    pub fn get(&self, id: TemplateId) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| QueryError::UnknownTemplate(id.to_string()))
    }

    pub fn get_template(&self, name: &str) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| QueryError::UnknownTemplate(name.to_string()))
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Template names with descriptions, in declaration order.
    pub fn list_templates(&self) -> Vec<(&'static str, &'static str)> {
        self.templates.iter().map(|t| (t.name(), t.description)).collect()
    }

    /// Render a template by name.
    pub fn render_named(&self, name: &str, params: &ParameterSet) -> Result<String> {
        let template = self.get_template(name)?;
        render_template(template, params)
    }

    pub fn render(&self, id: TemplateId, params: &ParameterSet) -> Result<String> {
        render_template(self.get(id)?, params)
    }

    /// Renders every template with its example values and runs both SQL gates
    /// over the result.
    pub fn self_check(&self) -> Vec<TemplateCheck> {
        self.templates
            .iter()
            .map(|t| {
                let checked = render_template(t, &t.example_params).and_then(|sql| {
                    let verdict = validate_sql(&sql);
                    if let Some(reason) = verdict.reason {
                        return Err(QueryError::ValidationFailed(reason));
                    }
                    assert_safe(&sql)?;
                    Ok(sql)
                });
                match checked {
                    Ok(sql) => TemplateCheck {
                        template: t.id,
                        ok: true,
                        sql: Some(sql),
                        error: None,
                    },
                    Err(e) => TemplateCheck {
                        template: t.id,
                        ok: false,
                        sql: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn render_template(template: &Template, params: &ParameterSet) -> Result<String> {
    let missing: Vec<String> = template
        .parameters
        .iter()
        .filter(|p| !params.contains(p))
        .map(|p| p.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(QueryError::MissingParameters(missing));
    }

    let mut sql = template.sql.to_string();
    for name in template.parameters {
        let value = match params.get(name) {
            Some(v) => v,
            None => continue,
        };
        if let ParamValue::Text(text) = value {
            if !ALLOWED_TEXT_PARAM.is_match(text) {
                return Err(QueryError::InvalidParameter {
                    name: name.to_string(),
                    value: text.clone(),
                });
            }
        }
        sql = sql.replace(&format!("{{{}}}", name), &value.to_string());
    }

    for (name, _) in params.iter().filter(|(n, _)| !template.requires(n)) {
        debug!("Ignoring parameter '{}' not declared by {}", name, template.id);
    }

    Ok(sql.trim().to_string())
}
