//! Natural-language questions over the `trades` and `holdings` datasets:
//! template planning with an LLM fallback, SQL validation and a bounded
//! execute-and-repair loop.

pub mod config;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod fallback;
pub mod guardrail;
pub mod history;
pub mod llm;
pub mod planner;
pub mod service;
pub mod templates;
pub mod validation;

pub use config::AppConfig;
pub use error::{QueryError, Result};
pub use execution::{PolarsClient, QueryClient, QueryOutcome, ResultPayload};
pub use execution_loop::{ExecutionLoop, LoopState, RepairReport};
pub use fallback::{FallbackGenerator, FallbackStrategy};
pub use guardrail::{InputGuard, LlmInputGuard};
pub use history::{ConversationHistory, ConversationTurn};
pub use planner::{PlanResult, QueryPlanner};
pub use service::{QueryResponse, QueryService};
pub use templates::{ParamValue, ParameterSet, TemplateCatalog, TemplateId};
