use crate::client::RateState;
use crate::types::{PipelineError, Result};
use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Mutable state of one pipeline run. Created fresh for every run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub completion_rate: RateState,
    pub synthesis_rate: RateState,
    pub deadline: Option<Instant>,
    /// Date announced in the narration and used in output names.
    pub run_date: NaiveDate,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            completion_rate: RateState::new(),
            synthesis_rate: RateState::new(),
            deadline: None,
            run_date: Utc::now().date_naive(),
        }
    }

    /// A budget too large to represent means no deadline.
    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Instant::now().checked_add(budget);
        if self.deadline.is_none() {
            warn!("Run deadline of {:?} is out of range, running without one", budget);
        }
        self
    }

    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail with `DeadlineExceeded` if the run is out of time before `stage` starts.
    pub fn check_deadline(&self, stage: &str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                warn!("Run deadline passed, not starting {}", stage);
                Err(PipelineError::DeadlineExceeded {
                    stage: stage.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_never_expires() {
        assert!(RunContext::new().check_deadline("batch 1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_budget() {
        let ctx = RunContext::new().with_deadline(Duration::from_secs(10));
        assert!(ctx.check_deadline("batch 1").is_ok());

        tokio::time::sleep(Duration::from_secs(11)).await;
        match ctx.check_deadline("batch 2") {
            Err(PipelineError::DeadlineExceeded { stage }) => assert_eq!(stage, "batch 2"),
            other => panic!("expected deadline error, got {:?}", other),
        }
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn unrepresentable_deadline_means_none() {
        let ctx = RunContext::new().with_deadline(Duration::MAX);
        assert_eq!(ctx.deadline, None);
        assert_eq!(ctx.remaining(), None);
        assert!(ctx.check_deadline("batch 1").is_ok());
    }
}
