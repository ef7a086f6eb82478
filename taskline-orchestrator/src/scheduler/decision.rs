//! Decision board
//!
//! Approval gates, approval jobs and manual checks park on the board
//! until an operator submits a decision through the API. A waiter is
//! registered for as long as its `DecisionWaiter` lives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use taskline_core::domain::task::ApprovalVote;
use taskline_core::dto::task::ManualDecision;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecisionTarget {
    /// The workflow-level approval gate
    Workflow,
    /// An approval job or a job paused for a manual check
    Job(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecisionKey {
    pub workflow_name: String,
    pub task_id: i64,
    pub target: DecisionTarget,
}

impl DecisionKey {
    pub fn workflow(workflow_name: &str, task_id: i64) -> Self {
        Self {
            workflow_name: workflow_name.to_string(),
            task_id,
            target: DecisionTarget::Workflow,
        }
    }

    pub fn job(workflow_name: &str, task_id: i64, job_name: &str) -> Self {
        Self {
            workflow_name: workflow_name.to_string(),
            task_id,
            target: DecisionTarget::Job(job_name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Vote(ApprovalVote),
    Manual { user: String, decision: ManualDecision },
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("nothing is waiting for a decision there")]
    NotWaiting,
}

#[derive(Clone, Default)]
pub struct DecisionBoard {
    waiters: Arc<DashMap<DecisionKey, mpsc::UnboundedSender<Decision>>>,
}

impl DecisionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, key: DecisionKey) -> DecisionWaiter {
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiters.insert(key.clone(), tx);
        DecisionWaiter {
            key,
            rx,
            waiters: self.waiters.clone(),
        }
    }

    pub fn submit(&self, key: &DecisionKey, decision: Decision) -> Result<(), DecisionError> {
        let sender = self.waiters.get(key).ok_or(DecisionError::NotWaiting)?;
        sender.send(decision).map_err(|_| DecisionError::NotWaiting)
    }

    pub fn is_waiting(&self, key: &DecisionKey) -> bool {
        self.waiters.contains_key(key)
    }
}

pub struct DecisionWaiter {
    key: DecisionKey,
    rx: mpsc::UnboundedReceiver<Decision>,
    waiters: Arc<DashMap<DecisionKey, mpsc::UnboundedSender<Decision>>>,
}

impl DecisionWaiter {
    pub async fn next(&mut self) -> Option<Decision> {
        self.rx.recv().await
    }
}

impl Drop for DecisionWaiter {
    fn drop(&mut self) {
        self.waiters.remove(&self.key);
    }
}

// =============================================================================
// Approval voting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    Timeout,
    Cancelled,
}

/// Votes of an approval in progress
pub struct ApprovalPoll<'a> {
    pub approvers: &'a [String],
    pub needed: usize,
    pub timeout: Duration,
}

impl ApprovalPoll<'_> {
    fn allowed(&self, user: &str) -> bool {
        self.approvers.is_empty() || self.approvers.iter().any(|a| a == user)
    }

    /// Collects votes until one rejects, enough approve, the poll times
    /// out or the task is cancelled. Every counted vote is passed to
    /// `on_vote` before the outcome is decided.
    pub async fn run<F>(
        &self,
        waiter: &mut DecisionWaiter,
        cancel: &CancellationToken,
        mut on_vote: F,
    ) -> ApprovalOutcome
    where
        F: FnMut(&ApprovalVote),
    {
        let needed = self.needed.max(1);
        let mut approved: Vec<String> = Vec::new();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                decision = waiter.next() => {
                    let Some(Decision::Vote(vote)) = decision else {
                        if decision.is_none() {
                            return ApprovalOutcome::Cancelled;
                        }
                        continue;
                    };
                    if !self.allowed(&vote.user) {
                        tracing::warn!("Ignoring vote of {}, not an approver", vote.user);
                        continue;
                    }
                    if approved.contains(&vote.user) {
                        continue;
                    }
                    on_vote(&vote);
                    if !vote.approve {
                        return ApprovalOutcome::Rejected;
                    }
                    approved.push(vote.user);
                    if approved.len() >= needed {
                        return ApprovalOutcome::Approved;
                    }
                }
                _ = &mut deadline => return ApprovalOutcome::Timeout,
                _ = cancel.cancelled() => return ApprovalOutcome::Cancelled,
            }
        }
    }
}

pub fn vote(user: &str, approve: bool, comment: &str) -> Decision {
    Decision::Vote(ApprovalVote {
        user: user.to_string(),
        approve,
        comment: comment.to_string(),
        time: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(approvers: &[String], needed: usize) -> ApprovalPoll<'_> {
        ApprovalPoll {
            approvers,
            needed,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_submit_without_waiter_fails() {
        let board = DecisionBoard::new();
        let result = board.submit(&DecisionKey::workflow("release", 1), vote("amy", true, ""));
        assert!(matches!(result, Err(DecisionError::NotWaiting)));
    }

    #[tokio::test]
    async fn test_waiter_unregisters_on_drop() {
        let board = DecisionBoard::new();
        let key = DecisionKey::job("release", 1, "approve");
        {
            let _waiter = board.open(key.clone());
            assert!(board.is_waiting(&key));
        }
        assert!(!board.is_waiting(&key));
    }

    #[tokio::test]
    async fn test_needed_approvals_counted_per_user() {
        let board = DecisionBoard::new();
        let key = DecisionKey::job("release", 1, "approve");
        let mut waiter = board.open(key.clone());
        let approvers = vec!["amy".to_string(), "bo".to_string()];

        board.submit(&key, vote("amy", true, "")).unwrap();
        board.submit(&key, vote("amy", true, "again")).unwrap();
        board.submit(&key, vote("mallory", true, "")).unwrap();
        board.submit(&key, vote("bo", true, "")).unwrap();

        let mut seen = Vec::new();
        let outcome = poll(&approvers, 2)
            .run(&mut waiter, &CancellationToken::new(), |v| seen.push(v.user.clone()))
            .await;

        assert_eq!(outcome, ApprovalOutcome::Approved);
        assert_eq!(seen, vec!["amy", "bo"]);
    }

    #[tokio::test]
    async fn test_reject_ends_the_poll() {
        let board = DecisionBoard::new();
        let key = DecisionKey::workflow("release", 2);
        let mut waiter = board.open(key.clone());
        board.submit(&key, vote("amy", false, "not today")).unwrap();

        let outcome = poll(&[], 2)
            .run(&mut waiter, &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome, ApprovalOutcome::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out() {
        let board = DecisionBoard::new();
        let mut waiter = board.open(DecisionKey::workflow("release", 3));

        let outcome = poll(&[], 1)
            .run(&mut waiter, &CancellationToken::new(), |_| {})
            .await;
        assert_eq!(outcome, ApprovalOutcome::Timeout);
    }
}
