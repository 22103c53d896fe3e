//! Query Service - question in, answer out
//!
//! Owns the planner, the repair loop and the data client:
//! 1. Screens the question with the input guard
//! 2. Answers greetings without touching the data
//! 3. Plans the question (template or fallback generator)
//! 4. Runs the candidate through the execution-repair loop
//! 5. Formats a short natural-language answer over the result

use crate::execution::{QueryClient, ResultPayload};
use crate::execution_loop::{
    CandidateSource, ExecutionLoop, FallbackResupply, KeepCandidate, LoopOutcome, RepairAttempt,
    SqlErrorClass,
};
use crate::guardrail::{AllowAll, GuardVerdict, InputGuard};
use crate::history::{ConversationHistory, ConversationTurn};
use crate::planner::{PlanResult, QueryPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Greetings in match order, with their canned replies.
const GREETINGS: &[(&str, &str)] = &[
    ("good morning", "Good morning! How can I help with your data today?"),
    ("good afternoon", "Good afternoon! What data would you like to explore?"),
    ("good evening", "Good evening! Ready to answer your data questions."),
    ("thank you", "You're welcome! Feel free to ask more questions."),
    ("thanks", "You're welcome! Let me know if you have more questions."),
    ("goodbye", "Goodbye! Happy to help again anytime."),
    ("hello", "Hello! Ask me anything about your Holdings and Trades data."),
    ("hey", "Hey! Ready to help with your data queries."),
    ("bye", "Goodbye! Come back anytime you need data insights."),
    ("hi", "Hi! What would you like to know about your data?"),
];

pub const NO_SQL_GENERATED: &str = "No SQL generated";

const CANNOT_PLAN_ANSWER: &str = "I couldn't understand that question. Please try rephrasing it as a data query.\n\n**Examples:**\n- \"Top 10 holdings by market value\"\n- \"How many trades per portfolio?\"\n- \"Show holdings for Garfield\"";

/// Response from the query service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Natural language answer
    pub answer: String,

    /// SQL actually sent on the last attempt
    pub sql: Option<String>,

    /// How the SQL was planned
    pub plan: Option<PlanResult>,

    /// Execution-repair attempt log
    pub attempts: Vec<RepairAttempt>,

    pub is_greeting: bool,

    /// `{columns, rows, row_count}` or `{error, ...}`; absent for greetings
    pub result: Option<ResultPayload>,
}

impl QueryResponse {
    fn greeting(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            sql: None,
            plan: None,
            attempts: Vec::new(),
            is_greeting: true,
            result: None,
        }
    }

    fn blocked(verdict: &GuardVerdict) -> Self {
        Self {
            answer: verdict.reason.clone(),
            sql: None,
            plan: None,
            attempts: Vec::new(),
            is_greeting: false,
            result: Some(ResultPayload::failure(verdict.error_tag())),
        }
    }

    fn cannot_plan(error: String) -> Self {
        Self {
            answer: CANNOT_PLAN_ANSWER.to_string(),
            sql: None,
            plan: None,
            attempts: Vec::new(),
            is_greeting: false,
            result: Some(ResultPayload::failure(error)),
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }

    /// The turn to append to the caller's history.
    pub fn to_turn(&self, question: &str) -> ConversationTurn {
        ConversationTurn::new(question, self.sql.clone(), self.answer.clone())
    }
}

/// The canned reply if `question` is a greeting.
pub fn detect_greeting(question: &str) -> Option<&'static str> {
    let q_lower = question.trim().to_lowercase();
    let q_lower = q_lower.trim_end_matches(['!', '.', '?']);

    GREETINGS
        .iter()
        .find(|(greeting, _)| {
            q_lower.strip_prefix(greeting).is_some_and(|rest| {
                rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
            })
        })
        .map(|(_, reply)| *reply)
}

/// Answer text for a successful result.
pub fn format_answer(result: &ResultPayload) -> String {
    match (result.row_count, result.columns.len()) {
        (0, _) => "No data found matching your query.".to_string(),
        (1, 1) => match &result.rows[0][0] {
            serde_json::Value::String(s) => format!("**Result:** {}", s),
            value => format!("**Result:** {}", value),
        },
        (n, _) => format!("Found {} result(s).", n),
    }
}

pub struct QueryService {
    planner: QueryPlanner,
    execution_loop: ExecutionLoop,
    client: Arc<dyn QueryClient>,
    guard: Arc<dyn InputGuard>,
}

impl QueryService {
    pub fn new(planner: QueryPlanner, execution_loop: ExecutionLoop, client: Arc<dyn QueryClient>) -> Self {
        Self {
            planner,
            execution_loop,
            client,
            guard: Arc::new(AllowAll),
        }
    }

    /// Replaces the pass-through guard.
    pub fn with_guard(mut self, guard: Arc<dyn InputGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    pub fn execution_loop(&self) -> &ExecutionLoop {
        &self.execution_loop
    }

    /// Answers one question. Failures come back inside the response.
    pub async fn ask(&self, question: &str, history: &ConversationHistory) -> QueryResponse {
        let verdict = self.guard.check(question).await;
        if !verdict.is_safe {
            warn!("Question blocked: {}", verdict.category);
            return QueryResponse::blocked(&verdict);
        }

        if let Some(reply) = detect_greeting(question) {
            info!("Greeting detected");
            return QueryResponse::greeting(reply);
        }

        let plan = match self.planner.plan(question, history).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return QueryResponse::cannot_plan(NO_SQL_GENERATED.to_string()),
            Err(e) => {
                warn!("Cannot plan '{}': {}", question, e);
                return QueryResponse::cannot_plan(e.to_string());
            }
        };

        let resupply: Box<dyn CandidateSource> = match self.planner.fallback() {
            Some(fallback) if plan.is_generated() => {
                Box::new(FallbackResupply::new(Arc::clone(fallback)))
            }
            _ => Box::new(KeepCandidate),
        };

        let report = self
            .execution_loop
            .run_with_source(
                self.client.as_ref(),
                &plan.sql,
                question,
                history,
                resupply.as_ref(),
            )
            .await;

        let sql = report
            .executed_sql()
            .map(str::to_string)
            .or_else(|| Some(plan.sql.clone()));

        let (answer, result) = match &report.outcome {
            LoopOutcome::Succeeded(outcome) => {
                let payload = ResultPayload::success(outcome.clone());
                (format_answer(&payload), payload)
            }
            LoopOutcome::Exhausted { last_error } => {
                let rejected = report.attempts.last().is_some_and(|a| {
                    matches!(
                        a.error_class,
                        Some(SqlErrorClass::Validation(_)) | Some(SqlErrorClass::Unsafe(_))
                    )
                });
                let answer = if rejected {
                    format!("Query validation failed: {}", last_error)
                } else {
                    format!("Query execution failed: {}", last_error)
                };
                (answer, ResultPayload::failure(last_error.clone()))
            }
        };

        QueryResponse {
            answer,
            sql,
            plan: Some(plan),
            attempts: report.attempts,
            is_greeting: false,
            result: Some(result),
        }
    }
}
