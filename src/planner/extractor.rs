//! Parameter Extractor
//!
//! Pulls `limit`, `portfolio_name` and `security_id` out of question text.
//! Only parameters the template declares are ever returned.

use crate::templates::{ParamValue, ParameterSet, Template};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

pub const DEFAULT_LIMIT: i64 = 10;

lazy_static! {
    static ref TOP_N: Regex = Regex::new(r"top\s+(\d+)").expect("valid regex");
    static ref N_LARGEST: Regex = Regex::new(r"(\d+)\s+(?:largest|biggest)").expect("valid regex");
    static ref PORTFOLIO_NAMED: Regex =
        Regex::new(r"portfolio[:\s]+([a-z0-9\s]+?)(?:\s|$|\?)").expect("valid regex");
    static ref FOR_OR_IN: Regex = Regex::new(r"(?:for|in)\s+([a-z]+)(?:\s|$|\?)").expect("valid regex");
    static ref SECURITY_ID: Regex = Regex::new(r"security(?:\s+id)?[:\s]+(\d+)").expect("valid regex");
}

/// Extracts the declared parameters of `template` from `question`. Never
/// fails; a required parameter that cannot be found is simply absent.
pub fn extract_parameters(question: &str, template: &Template) -> ParameterSet {
    let q_lower = question.to_lowercase();
    let mut params = ParameterSet::new();

    if template.requires("limit") {
        let limit = TOP_N
            .captures(&q_lower)
            .or_else(|| N_LARGEST.captures(&q_lower))
            .and_then(|c| c[1].parse::<i64>().ok())
            .unwrap_or(DEFAULT_LIMIT);
        params.insert("limit", ParamValue::Int(limit));
    }

    if template.requires("portfolio_name") {
        let raw = PORTFOLIO_NAMED
            .captures(&q_lower)
            .or_else(|| FOR_OR_IN.captures(&q_lower))
            .map(|c| c[1].trim().to_string());
        if let Some(raw) = raw.filter(|r| !r.is_empty()) {
            params.insert("portfolio_name", ParamValue::Text(title_case(&raw)));
        }
    }

    if template.requires("security_id") {
        if let Some(id) = SECURITY_ID
            .captures(&q_lower)
            .and_then(|c| c[1].parse::<i64>().ok())
        {
            params.insert("security_id", ParamValue::Int(id));
        }
    }

    debug!("Extracted {} parameter(s) for {}", params.len(), template.id);
    params
}

/// Uppercases the first letter of every word and lowercases the rest.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{TemplateCatalog, TemplateId};

    fn extract(question: &str, id: TemplateId) -> ParameterSet {
        let catalog = TemplateCatalog::standard();
        extract_parameters(question, catalog.get(id).unwrap())
    }

    #[test]
    fn test_limit_from_top_n() {
        let params = extract("Top 5 holdings by market value", TemplateId::TopHoldingsByMv);
        assert_eq!(params.get("limit"), Some(&ParamValue::Int(5)));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_limit_from_n_largest() {
        let params = extract("Show the 20 largest trades", TemplateId::LargestTrades);
        assert_eq!(params.get("limit"), Some(&ParamValue::Int(20)));
    }

    #[test]
    fn test_limit_defaults_when_required() {
        let params = extract("Largest trades", TemplateId::LargestTrades);
        assert_eq!(params.get("limit"), Some(&ParamValue::Int(DEFAULT_LIMIT)));
    }

    #[test]
    fn test_undeclared_parameters_are_dropped() {
        let params = extract(
            "Top 3 trades per portfolio for security 12",
            TemplateId::CountTradesByPortfolio,
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_portfolio_name_title_cased() {
        let params = extract("Holdings for portfolio garfield", TemplateId::HoldingsForPortfolio);
        assert_eq!(
            params.get("portfolio_name"),
            Some(&ParamValue::Text("Garfield".to_string()))
        );
    }

    #[test]
    fn test_portfolio_name_from_for_clause() {
        let params = extract("Positions in heather please", TemplateId::HoldingsForPortfolio);
        assert_eq!(
            params.get("portfolio_name"),
            Some(&ParamValue::Text("Heather".to_string()))
        );
    }

    #[test]
    fn test_security_id() {
        let params = extract("Show trades for security id 273482", TemplateId::TradesForSecurity);
        assert_eq!(params.get("security_id"), Some(&ParamValue::Int(273482)));
        assert_eq!(params.get("limit"), Some(&ParamValue::Int(DEFAULT_LIMIT)));
    }

    #[test]
    fn test_missing_security_id_is_absent() {
        let params = extract("Show trades for this stock", TemplateId::TradesForSecurity);
        assert!(!params.contains("security_id"));
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("mnc investment fund"), "Mnc Investment Fund");
        assert_eq!(title_case("GARFIELD"), "Garfield");
    }
}
