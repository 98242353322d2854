//! Per-request pipeline state machine
//!
//! Valid transitions:
//! 1. Init       → Retrieving  (on: Validated)
//! 2. Retrieving → Composing   (on: Retrieved)
//! 3. Composing  → Generating  (on: Composed)
//! 4. Generating → Finalizing  (on: StreamFinished)
//! 5. Finalizing → Done        (on: Persisted)
//! 6. any non-Done → Failed    (on: Failure)
//!
//! Done and Failed are terminal.

use serde::{Deserialize, Serialize};

use crate::errors::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    /// Session loaded, request being validated
    Init,
    Retrieving,
    Composing,
    /// Forwarding fragments
    Generating,
    /// Answer assembled, turn being appended
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Validated,
    Retrieved,
    Composed,
    StreamFinished,
    Persisted,
    Failure,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn transition(&self, event: PipelineEvent) -> Result<PipelineState> {
        use PipelineEvent::*;
        use PipelineState::*;

        let next = match (self, event) {
            (Init, Validated) => Retrieving,
            (Retrieving, Retrieved) => Composing,
            (Composing, Composed) => Generating,
            (Generating, StreamFinished) => Finalizing,
            (Finalizing, Persisted) => Done,
            (Failed, _) => Failed,
            (Done, _) => {
                return Err(RagError::InvalidTransition {
                    from: "Done".to_string(),
                    event: format!("{:?}", event),
                })
            }
            (_, Failure) => Failed,
            (from, event) => {
                return Err(RagError::InvalidTransition {
                    from: format!("{:?}", from),
                    event: format!("{:?}", event),
                })
            }
        };

        Ok(next)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PipelineState::Init => "Initializing",
            PipelineState::Retrieving => "Retrieving",
            PipelineState::Composing => "Composing",
            PipelineState::Generating => "Generating",
            PipelineState::Finalizing => "Finalizing",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = PipelineState::Init;
        for event in [
            PipelineEvent::Validated,
            PipelineEvent::Retrieved,
            PipelineEvent::Composed,
            PipelineEvent::StreamFinished,
            PipelineEvent::Persisted,
        ] {
            state = state.transition(event).unwrap();
        }
        assert_eq!(state, PipelineState::Done);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_failure_from_any_active_state() {
        for state in [
            PipelineState::Init,
            PipelineState::Retrieving,
            PipelineState::Composing,
            PipelineState::Generating,
            PipelineState::Finalizing,
        ] {
            assert_eq!(state.transition(PipelineEvent::Failure).unwrap(), PipelineState::Failed);
        }
    }

    #[test]
    fn test_done_rejects_failure() {
        assert!(PipelineState::Done.transition(PipelineEvent::Failure).is_err());
    }

    #[test]
    fn test_failed_is_absorbing() {
        assert_eq!(
            PipelineState::Failed.transition(PipelineEvent::Composed).unwrap(),
            PipelineState::Failed
        );
    }

    #[test]
    fn test_skipping_states_rejected() {
        let err = PipelineState::Init.transition(PipelineEvent::Composed).unwrap_err();
        assert!(matches!(err, RagError::InvalidTransition { .. }));
        assert!(PipelineState::Retrieving.transition(PipelineEvent::StreamFinished).is_err());
    }
}
