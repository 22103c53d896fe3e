//! Execution Loop
//!
//! Bounded execute-and-repair loop over a single candidate. Each attempt runs
//! structural validation and the safety assertion, applies the row cap and
//! executes. Failures are classified; conversion and type-mismatch errors get
//! a textual rewrite, anything else may be replaced by a [`CandidateSource`].

use crate::error::{QueryError, Result};
use crate::execution::{QueryClient, QueryOutcome};
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use crate::execution_loop::error_recovery::{apply_row_cap, ErrorRecovery};
use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_ROW_CAP};
use crate::fallback::FallbackStrategy;
use crate::history::ConversationHistory;
use crate::validation::{assert_safe, validate_sql};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Attempting(u8),
    Succeeded,
    Exhausted,
}

/// One execute-or-validate cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub attempt: u8,
    /// SQL as sent to the client, or the rejected candidate when a gate failed
    pub sql: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_class: Option<SqlErrorClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Succeeded(QueryOutcome),
    Exhausted { last_error: String },
}

/// Result of a loop run, with the attempt log.
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub attempts: Vec<RepairAttempt>,
    pub outcome: LoopOutcome,
}

impl RepairReport {
    pub fn state(&self) -> LoopState {
        match self.outcome {
            LoopOutcome::Succeeded(_) => LoopState::Succeeded,
            LoopOutcome::Exhausted { .. } => LoopState::Exhausted,
        }
    }

    pub fn attempt_count(&self) -> u8 {
        self.attempts.last().map(|a| a.attempt).unwrap_or(0)
    }

    /// SQL of the final attempt.
    pub fn executed_sql(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.sql.as_str())
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.outcome {
            LoopOutcome::Succeeded(_) => None,
            LoopOutcome::Exhausted { last_error } => Some(last_error),
        }
    }

    pub fn into_result(self) -> Result<QueryOutcome> {
        let attempts = self.attempt_count();
        match self.outcome {
            LoopOutcome::Succeeded(outcome) => Ok(outcome),
            LoopOutcome::Exhausted { last_error } => Err(QueryError::Exhausted {
                attempts,
                last_error,
            }),
        }
    }
}

/// Supplies a replacement candidate after a failure the loop cannot rewrite.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn next_candidate(
        &self,
        question: &str,
        history: &ConversationHistory,
        failed: &RepairAttempt,
    ) -> Option<String>;
}

/// Never offers a replacement; the unchanged candidate is retried.
pub struct KeepCandidate;

#[async_trait]
impl CandidateSource for KeepCandidate {
    async fn next_candidate(
        &self,
        _question: &str,
        _history: &ConversationHistory,
        _failed: &RepairAttempt,
    ) -> Option<String> {
        None
    }
}

/// Asks the fallback generator again, feeding back the failed attempt's error.
pub struct FallbackResupply {
    fallback: Arc<dyn FallbackStrategy>,
}

impl FallbackResupply {
    pub fn new(fallback: Arc<dyn FallbackStrategy>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl CandidateSource for FallbackResupply {
    async fn next_candidate(
        &self,
        question: &str,
        history: &ConversationHistory,
        failed: &RepairAttempt,
    ) -> Option<String> {
        let feedback = format!(
            "The SQL `{}` failed: {}",
            failed.sql,
            failed.error.as_deref().unwrap_or("unknown error")
        );
        self.fallback
            .generate(question, history, Some(&feedback))
            .await
            .map(|generated| generated.sql)
    }
}

/// Execution loop with bounded retries
pub struct ExecutionLoop {
    max_attempts: u8,
    row_cap: usize,
    error_classifier: ErrorClassifier,
    error_recovery: ErrorRecovery,
}

impl ExecutionLoop {
    pub fn new(max_attempts: u8, row_cap: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            row_cap,
            error_classifier: ErrorClassifier::new(),
            error_recovery: ErrorRecovery::new(),
        }
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    /// Runs a candidate with automatic rewrites only.
    pub async fn run(&self, client: &dyn QueryClient, sql: &str) -> RepairReport {
        self.run_with_source(client, sql, "", &ConversationHistory::new(), &KeepCandidate)
            .await
    }

    /// Runs a candidate, consulting `source` after failures with no rewrite.
    pub async fn run_with_source(
        &self,
        client: &dyn QueryClient,
        sql: &str,
        question: &str,
        history: &ConversationHistory,
        source: &dyn CandidateSource,
    ) -> RepairReport {
        let mut candidate = sql.trim().to_string();
        let mut attempts: Vec<RepairAttempt> = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let state = LoopState::Attempting(attempt);
            debug!("{:?} on {} with: {}", state, client.name(), candidate);

            let (tried_sql, result) = self.try_candidate(client, &candidate).await;

            let error = match result {
                Ok(outcome) => {
                    info!(
                        "Query succeeded on attempt {}/{} ({} row(s))",
                        attempt,
                        self.max_attempts,
                        outcome.row_count()
                    );
                    attempts.push(RepairAttempt {
                        attempt,
                        sql: tried_sql,
                        error: None,
                        error_class: None,
                    });
                    return RepairReport {
                        attempts,
                        outcome: LoopOutcome::Succeeded(outcome),
                    };
                }
                Err(e) => e,
            };

            let error_class = self.error_classifier.classify(&error);
            last_error = error_text(&error);
            warn!(
                "Attempt {}/{} failed ({}): {}",
                attempt, self.max_attempts, error_class, last_error
            );
            let failed = RepairAttempt {
                attempt,
                sql: tried_sql,
                error: Some(last_error.clone()),
                error_class: Some(error_class.clone()),
            };
            attempts.push(failed.clone());

            let attempts_remain = attempt < self.max_attempts;

            if let SqlErrorClass::Unsafe(_) = error_class {
                // never executed, never rewritten
                let replacement = if attempts_remain {
                    source.next_candidate(question, history, &failed).await
                } else {
                    None
                };
                match replacement {
                    Some(next) => {
                        info!("Discarding unsafe candidate, trying a replacement");
                        candidate = next.trim().to_string();
                        continue;
                    }
                    None => {
                        warn!("Unsafe candidate with no replacement, stopping");
                        break;
                    }
                }
            }

            if !attempts_remain {
                break;
            }

            if let Some(rewritten) = self.error_recovery.rewrite(&error_class, &candidate) {
                info!("Applying {} rewrite before attempt {}", error_class, attempt + 1);
                candidate = rewritten;
            } else if let Some(next) = source.next_candidate(question, history, &failed).await {
                info!("Received a replacement candidate for attempt {}", attempt + 1);
                candidate = next.trim().to_string();
            }
        }

        warn!(
            "Query failed after {} attempt(s). Last error: {}",
            attempts.len(),
            last_error
        );
        RepairReport {
            attempts,
            outcome: LoopOutcome::Exhausted { last_error },
        }
    }

    /// Gates, caps and executes one candidate. Returns the SQL tried with the result.
    async fn try_candidate(
        &self,
        client: &dyn QueryClient,
        candidate: &str,
    ) -> (String, Result<QueryOutcome>) {
        if let Err(e) = validate_sql(candidate).into_result() {
            return (candidate.to_string(), Err(e));
        }
        if let Err(e) = assert_safe(candidate) {
            return (candidate.to_string(), Err(e));
        }

        let capped = apply_row_cap(candidate, self.row_cap);
        let result = client.run_sql(&capped).await;
        (capped, result)
    }
}

impl Default for ExecutionLoop {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_ROW_CAP)
    }
}

/// Collaborator messages are surfaced verbatim.
fn error_text(error: &QueryError) -> String {
    match error {
        QueryError::Execution(message) => message.clone(),
        other => other.to_string(),
    }
}
