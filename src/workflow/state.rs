// ChatPay — Workflow state machine
//
//   COLLECTING(i) -> [QUOTING] -> CONFIRMING -> SUBMITTING -> DONE
//                                            \-> DECLINED
//   CANCELLED reachable from any non-terminal state except SUBMITTING.
//   FAILED reachable from any non-terminal state.

use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    /// Asking field `index` of the form; `recipient` is set inside a repeated sub-form.
    Collecting {
        index: usize,
        recipient: Option<usize>,
    },
    Quoting,
    Confirming,
    /// The single remote submission is in flight; further input is rejected.
    Submitting,
    Done,
    Cancelled,
    Declined,
    Failed,
}

impl WorkflowState {
    pub const INITIAL: WorkflowState = WorkflowState::Collecting {
        index: 0,
        recipient: None,
    };

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Done
                | WorkflowState::Cancelled
                | WorkflowState::Declined
                | WorkflowState::Failed
        )
    }

    pub fn can_transition_to(&self, next: WorkflowState) -> bool {
        use WorkflowState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) => true,
            (Submitting, Done) => true,
            (Submitting, _) => false,
            (_, Cancelled) => true,
            (Collecting { .. }, Collecting { .. }) => true,
            (Collecting { .. }, Quoting) | (Collecting { .. }, Confirming) => true,
            // Forms without a confirmation step (login) finish straight from collection.
            (Collecting { .. }, Done) => true,
            (Quoting, Confirming) => true,
            (Confirming, Submitting) | (Confirming, Declined) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Collecting { .. } => "COLLECTING",
            WorkflowState::Quoting => "QUOTING",
            WorkflowState::Confirming => "CONFIRMING",
            WorkflowState::Submitting => "SUBMITTING",
            WorkflowState::Done => "DONE",
            WorkflowState::Cancelled => "CANCELLED",
            WorkflowState::Declined => "DECLINED",
            WorkflowState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Collecting {
                index,
                recipient: Some(r),
            } => write!(f, "COLLECTING({}, recipient {})", index, r),
            WorkflowState::Collecting { index, .. } => write!(f, "COLLECTING({})", index),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid workflow transition {from} -> {to}")]
pub struct TransitionError {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

/// Shared, inspectable state of one running workflow instance.
#[derive(Debug, Clone)]
pub struct WorkflowTracker {
    state: Arc<Mutex<WorkflowState>>,
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WorkflowState::INITIAL)),
        }
    }

    pub fn current(&self) -> WorkflowState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&self, next: WorkflowState) -> Result<WorkflowState, TransitionError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(next) {
            return Err(TransitionError {
                from: *state,
                to: next,
            });
        }
        let previous = *state;
        *state = next;
        tracing::trace!(from = %previous, to = %next, "Workflow transition");
        Ok(previous)
    }

    /// Cancel the workflow from outside while it is still collecting or
    /// confirming. Otherwise returns the state that prevented it.
    ///
    /// The workflow notices on its next transition or prompt.
    pub fn revoke(&self) -> Result<(), WorkflowState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            WorkflowState::Collecting { .. } | WorkflowState::Confirming => {
                tracing::trace!(from = %*state, "Workflow revoked");
                *state = WorkflowState::Cancelled;
                Ok(())
            }
            other => Err(other),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.current() == WorkflowState::Cancelled
    }
}

impl Default for WorkflowTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let t = WorkflowTracker::new();
        t.advance(WorkflowState::Collecting {
            index: 1,
            recipient: None,
        })
        .unwrap();
        t.advance(WorkflowState::Confirming).unwrap();
        t.advance(WorkflowState::Submitting).unwrap();
        t.advance(WorkflowState::Done).unwrap();
        assert!(t.current().is_terminal());
    }

    #[test]
    fn test_submitting_is_single_shot() {
        let t = WorkflowTracker::new();
        t.advance(WorkflowState::Confirming).unwrap();
        t.advance(WorkflowState::Submitting).unwrap();
        assert!(t.advance(WorkflowState::Submitting).is_err());
        assert!(t.advance(WorkflowState::Cancelled).is_err());
        t.advance(WorkflowState::Done).unwrap();
        assert!(t.advance(WorkflowState::Submitting).is_err());
    }

    #[test]
    fn test_cancel_from_any_collecting_state() {
        let t = WorkflowTracker::new();
        t.advance(WorkflowState::Cancelled).unwrap();
        assert_eq!(t.current(), WorkflowState::Cancelled);
        assert!(t.advance(WorkflowState::Failed).is_err());
    }

    #[test]
    fn test_revoke_only_while_waiting_on_the_user() {
        let t = WorkflowTracker::new();
        t.revoke().unwrap();
        assert!(t.is_revoked());
        assert!(t
            .advance(WorkflowState::Collecting {
                index: 1,
                recipient: None
            })
            .is_err());

        let t = WorkflowTracker::new();
        t.advance(WorkflowState::Confirming).unwrap();
        t.revoke().unwrap();
        assert!(t.advance(WorkflowState::Submitting).is_err());

        let t = WorkflowTracker::new();
        t.advance(WorkflowState::Quoting).unwrap();
        assert_eq!(t.revoke(), Err(WorkflowState::Quoting));
        t.advance(WorkflowState::Confirming).unwrap();
        t.advance(WorkflowState::Submitting).unwrap();
        assert_eq!(t.revoke(), Err(WorkflowState::Submitting));
        t.advance(WorkflowState::Done).unwrap();
        assert_eq!(t.revoke(), Err(WorkflowState::Done));
    }

    #[test]
    fn test_quote_only_before_confirmation() {
        assert!(WorkflowState::INITIAL.can_transition_to(WorkflowState::Quoting));
        assert!(WorkflowState::Quoting.can_transition_to(WorkflowState::Confirming));
        assert!(!WorkflowState::Confirming.can_transition_to(WorkflowState::Quoting));
        assert!(!WorkflowState::Quoting.can_transition_to(WorkflowState::Submitting));
    }

    #[test]
    fn test_display() {
        let s = WorkflowState::Collecting {
            index: 2,
            recipient: Some(0),
        };
        assert_eq!(s.to_string(), "COLLECTING(2, recipient 0)");
        assert_eq!(WorkflowState::Declined.to_string(), "DECLINED");
    }
}
