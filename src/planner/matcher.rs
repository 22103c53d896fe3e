//! Pattern Matcher
//!
//! Ordered (template, patterns) table. The first template with any matching
//! pattern wins; there is no scoring.

use crate::templates::TemplateId;
use regex::Regex;
use tracing::debug;

const PATTERNS: &[(TemplateId, &[&str])] = &[
    (
        TemplateId::CountTradesByPortfolio,
        &[
            r"how many trades.*portfolio",
            r"count.*trades.*by.*portfolio",
            r"trades.*per.*portfolio",
            r"number of trades.*portfolio",
        ],
    ),
    (
        TemplateId::TopHoldingsByMv,
        &[
            r"top.*holdings",
            r"largest.*holdings",
            r"biggest.*positions",
            r"holdings.*by.*(?:market value|mv)",
        ],
    ),
    (
        TemplateId::PnlByPortfolio,
        &[
            r"p[&]?l.*by.*portfolio",
            r"profit.*loss.*portfolio",
            r"ytd.*portfolio",
            r"performance.*portfolio",
        ],
    ),
    (
        TemplateId::NetTradedQtyBySecurity,
        &[
            r"net.*trad(?:ed|ing).*(?:quantity|qty)",
            r"net.*position.*from.*trades",
            r"buy.*sell.*by.*security",
        ],
    ),
    (
        TemplateId::PortfolioSummary,
        &[
            r"portfolio.*summary",
            r"overview.*portfolio",
            r"portfolio.*total",
        ],
    ),
    (
        TemplateId::TradesForSecurity,
        &[
            r"trades.*for.*(?:security|stock|bond)",
            r"trading.*activity.*(?:security|stock)",
            r"show.*trades.*(?:security|stock)",
        ],
    ),
    (
        TemplateId::HoldingsForPortfolio,
        &[
            r"holdings.*for.*portfolio",
            r"what.*does.*(?:portfolio.*)?(?:hold|own)",
            r"positions.*in.*portfolio",
        ],
    ),
    (
        TemplateId::LargestTrades,
        &[
            r"largest.*trades",
            r"biggest.*trades",
            r"top.*trades.*by.*(?:size|value|principal)",
        ],
    ),
    (
        TemplateId::UniqueSecurities,
        &[
            r"how many.*(?:unique|different).*securities",
            r"count.*securities",
            r"number of.*securities",
        ],
    ),
    (
        TemplateId::AllocationSummary,
        &[
            r"allocation.*(?:summary|rules)",
            r"how.*trades.*allocated",
            r"allocation.*methods",
        ],
    ),
];

pub struct PatternMatcher {
    rules: Vec<(TemplateId, Vec<Regex>)>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        let rules = PATTERNS
            .iter()
            .map(|(id, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("static template pattern compiles"))
                    .collect();
                (*id, compiled)
            })
            .collect();
        Self { rules }
    }

    /// Returns the first template whose patterns match the lowercased question.
    pub fn detect(&self, question: &str) -> Option<TemplateId> {
        let q_lower = question.to_lowercase();

        for (template, patterns) in &self.rules {
            if let Some(pattern) = patterns.iter().find(|p| p.is_match(&q_lower)) {
                debug!("Question matched {} via /{}/", template, pattern.as_str());
                return Some(*template);
            }
        }

        None
    }

    pub fn rules(&self) -> impl Iterator<Item = (TemplateId, &[Regex])> {
        self.rules.iter().map(|(id, p)| (*id, p.as_slice()))
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_templates() {
        let matcher = PatternMatcher::new();
        let cases = [
            ("How many trades per portfolio?", TemplateId::CountTradesByPortfolio),
            ("Top 5 holdings by market value", TemplateId::TopHoldingsByMv),
            ("What's the P&L by portfolio?", TemplateId::PnlByPortfolio),
            ("Net traded quantity per name", TemplateId::NetTradedQtyBySecurity),
            ("Give me a portfolio summary", TemplateId::PortfolioSummary),
            ("Show trades for security 273482", TemplateId::TradesForSecurity),
            ("Holdings for portfolio Garfield", TemplateId::HoldingsForPortfolio),
            ("Largest 20 trades", TemplateId::LargestTrades),
            ("Count unique securities", TemplateId::UniqueSecurities),
            ("Allocation rules summary", TemplateId::AllocationSummary),
        ];
        for (question, expected) in cases {
            assert_eq!(matcher.detect(question), Some(expected), "{question}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = PatternMatcher::new();
        // also matches "portfolio.*total" further down the table
        assert_eq!(
            matcher.detect("How many trades per portfolio in total?"),
            Some(TemplateId::CountTradesByPortfolio)
        );
    }

    #[test]
    fn test_no_match() {
        let matcher = PatternMatcher::new();
        assert_eq!(matcher.detect("What is the average price of bonds?"), None);
        assert_eq!(matcher.detect(""), None);
    }

    #[test]
    fn test_rules_keep_declaration_order() {
        let matcher = PatternMatcher::new();
        let order: Vec<TemplateId> = matcher.rules().map(|(id, _)| id).collect();
        assert_eq!(order, TemplateId::ALL.to_vec());
    }
}
