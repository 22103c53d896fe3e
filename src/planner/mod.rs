//! Query Planner
//!
//! question → pattern matcher → parameter extractor → template render, with a
//! constructor-injected fallback strategy for questions no template covers.

pub mod extractor;
pub mod matcher;

pub use extractor::*;
pub use matcher::*;

use crate::error::Result;
use crate::fallback::FallbackStrategy;
use crate::history::ConversationHistory;
use crate::templates::{ParameterSet, TemplateCatalog, TemplateId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Which path produced a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PlanSource {
    Template { template: TemplateId },
    LlmGenerated { attempts: u8 },
}

/// Rendered SQL plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub sql: String,
    #[serde(flatten)]
    pub source: PlanSource,
    pub parameters: ParameterSet,
    pub description: String,
}

impl PlanResult {
    pub fn template(&self) -> Option<TemplateId> {
        match self.source {
            PlanSource::Template { template } => Some(template),
            PlanSource::LlmGenerated { .. } => None,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(self.source, PlanSource::LlmGenerated { .. })
    }
}

pub struct QueryPlanner {
    catalog: TemplateCatalog,
    matcher: PatternMatcher,
    fallback: Option<Arc<dyn FallbackStrategy>>,
}

impl QueryPlanner {
    /// Template-only planner.
    pub fn new(catalog: TemplateCatalog) -> Self {
        Self {
            catalog,
            matcher: PatternMatcher::new(),
            fallback: None,
        }
    }

    pub fn with_fallback(catalog: TemplateCatalog, fallback: Arc<dyn FallbackStrategy>) -> Self {
        Self {
            catalog,
            matcher: PatternMatcher::new(),
            fallback: Some(fallback),
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn fallback(&self) -> Option<&Arc<dyn FallbackStrategy>> {
        self.fallback.as_ref()
    }

    pub fn detect_template(&self, question: &str) -> Option<TemplateId> {
        self.matcher.detect(question)
    }

    /// Plans a question. `Err` means a matched template could not be rendered;
    /// `Ok(None)` means nothing matched and no fallback produced SQL.
    pub async fn plan(
        &self,
        question: &str,
        history: &ConversationHistory,
    ) -> Result<Option<PlanResult>> {
        if let Some(id) = self.matcher.detect(question) {
            let template = self.catalog.get(id)?;
            let parameters = extract_parameters(question, template);
            let sql = self.catalog.render(id, &parameters)?;

            info!("Planned '{}' with template {}", question, id);
            return Ok(Some(PlanResult {
                sql,
                source: PlanSource::Template { template: id },
                parameters,
                description: template.description.to_string(),
            }));
        }

        let Some(fallback) = &self.fallback else {
            info!("No template matched '{}' and no fallback is configured", question);
            return Ok(None);
        };

        info!("No template matched '{}', using LLM text-to-SQL", question);
        Ok(fallback
            .generate(question, history, None)
            .await
            .map(|generated| PlanResult {
                sql: generated.sql,
                source: PlanSource::LlmGenerated {
                    attempts: generated.attempts,
                },
                parameters: ParameterSet::new(),
                description: format!("LLM-generated SQL for: {}", question),
            }))
    }
}
