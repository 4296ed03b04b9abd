//! Bounded correction loop
//!
//! ```text
//! Unverified --pass--> Valid
//! Unverified --fail--> Correcting(1) --pass--> Corrected
//!                      Correcting(n) --fail--> Correcting(n + 1)   (n < max)
//!                      Correcting(max) --fail--> Failed
//! ```
//!
//! Each `Correcting(n)` step is one generator call, so a query is generated
//! at most `1 + max_attempts` times.

use super::{VerificationIssue, VerificationResult, Verifier};
use crate::error::Result;
use crate::generator::{CorrectionAttempt, GeneratedQuery, QueryStatus, SqlGenerator};
use crate::schema::Schema;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionState {
    Unverified,
    Correcting(u32),
    Valid,
    Corrected,
    Failed,
}

impl CorrectionState {
    /// Transition after a verification run.
    pub fn next(self, passed: bool, max_attempts: u32) -> CorrectionState {
        match (self, passed) {
            (CorrectionState::Unverified, true) => CorrectionState::Valid,
            (CorrectionState::Correcting(_), true) => CorrectionState::Corrected,
            (CorrectionState::Unverified, false) if max_attempts > 0 => {
                CorrectionState::Correcting(1)
            }
            (CorrectionState::Correcting(n), false) if n < max_attempts => {
                CorrectionState::Correcting(n + 1)
            }
            (CorrectionState::Unverified | CorrectionState::Correcting(_), false) => {
                CorrectionState::Failed
            }
            (terminal, _) => terminal,
        }
    }

    pub fn status(&self) -> QueryStatus {
        match self {
            CorrectionState::Valid => QueryStatus::Valid,
            CorrectionState::Corrected => QueryStatus::Corrected,
            CorrectionState::Failed => QueryStatus::Failed,
            CorrectionState::Unverified | CorrectionState::Correcting(_) => QueryStatus::Unverified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Corrector {
    verifier: Verifier,
    max_attempts: u32,
}

impl Corrector {
    pub fn new(verifier: Verifier, max_attempts: u32) -> Self {
        Self {
            verifier,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// One correction: regenerate against `issue` and record the rejected
    /// SQL in the query's history.
    pub async fn correct(
        &self,
        generator: &SqlGenerator,
        question: &str,
        schema: &Schema,
        query: &mut GeneratedQuery,
        issue: &VerificationIssue,
        attempt: u32,
    ) -> Result<()> {
        info!(attempt, max = self.max_attempts, %issue, "Requesting SQL correction");
        let issue_text = issue.to_string();
        let sql = generator
            .regenerate(question, schema, query, &issue_text, attempt, self.max_attempts)
            .await?;

        let previous = std::mem::replace(&mut query.sql, sql);
        query.history.push(CorrectionAttempt {
            sql: previous,
            issue: issue_text,
        });
        query.attempts += 1;
        Ok(())
    }

    /// Verify, correcting until the query passes or the budget is spent.
    /// The returned query carries its final status; on failure the last SQL
    /// and its outstanding issue are kept.
    pub async fn verify_and_correct(
        &self,
        generator: &SqlGenerator,
        question: &str,
        schema: &Schema,
        mut query: GeneratedQuery,
    ) -> Result<(GeneratedQuery, VerificationResult)> {
        let mut state = CorrectionState::Unverified;
        loop {
            let mut verification = self.verifier.verify(&query, schema);
            state = state.next(verification.passed, self.max_attempts);

            if let CorrectionState::Correcting(attempt) = state {
                let issue = verification
                    .issue()
                    .cloned()
                    .unwrap_or(VerificationIssue::Empty);
                self.correct(generator, question, schema, &mut query, &issue, attempt)
                    .await?;
                continue;
            }

            query.status = state.status();
            match state {
                CorrectionState::Corrected => {
                    verification.corrected_sql = Some(query.sql.clone());
                    info!(attempts = query.attempts, "SQL corrected");
                }
                CorrectionState::Failed => {
                    warn!(
                        attempts = query.attempts,
                        issue = ?verification.issue().map(|i| i.to_string()),
                        "SQL still failing after correction budget"
                    );
                }
                _ => {}
            }
            return Ok((query, verification));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_is_bounded() {
        let max = 2;
        let mut state = CorrectionState::Unverified;
        let mut generator_calls = 1;
        loop {
            state = state.next(false, max);
            match state {
                CorrectionState::Correcting(_) => generator_calls += 1,
                _ => break,
            }
        }
        assert_eq!(state, CorrectionState::Failed);
        assert_eq!(generator_calls, 3);
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(CorrectionState::Unverified.next(true, 2), CorrectionState::Valid);
        assert_eq!(CorrectionState::Unverified.next(false, 2), CorrectionState::Correcting(1));
        assert_eq!(CorrectionState::Correcting(1).next(true, 2), CorrectionState::Corrected);
        assert_eq!(CorrectionState::Correcting(2).next(false, 2), CorrectionState::Failed);
        assert_eq!(CorrectionState::Unverified.next(false, 0), CorrectionState::Failed);
        assert_eq!(CorrectionState::Failed.next(true, 2), CorrectionState::Failed);
        assert_eq!(CorrectionState::Corrected.status(), QueryStatus::Corrected);
    }
}
