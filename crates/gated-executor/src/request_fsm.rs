//! State machine for one auth-gated request.
//!
//! ## State Diagram
//!
//! ```text
//!  Idle ──Begin──► TokenRequested ──TokenAcquired──► Dispatched ──Success──► Succeeded
//!                        │                              │  │
//!                   TokenFailed                OtherError  AuthRejected
//!                        ▼                              ▼  ▼
//!                      Failed ◄─────────────────────  Failed  RetryPending
//!                                                              │ Invalidated
//!                                                              ▼
//!                      Failed ◄──TokenFailed── RetryTokenRequested
//!                                                              │ TokenAcquired
//!                                                              ▼
//!          Succeeded ◄──Success── RetryDispatched ──AuthRejected/OtherError──► Failed
//! ```
//!
//! The retry leg has its own states, so `RetryDispatched` has no edge back to
//! `RetryPending`: a third token acquisition cannot be expressed. `Cancel`
//! is accepted from every non-terminal state.

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub request_machine(Idle)

    Idle => {
        Begin => TokenRequested,
        Cancel => Cancelled
    },
    TokenRequested => {
        TokenAcquired => Dispatched,
        TokenFailed => Failed,
        Cancel => Cancelled
    },
    Dispatched => {
        Success => Succeeded,
        OtherError => Failed,
        // First rejection of the token: invalidate and go again, once
        AuthRejected => RetryPending,
        Cancel => Cancelled
    },
    RetryPending => {
        Invalidated => RetryTokenRequested,
        TokenFailed => Failed,
        Cancel => Cancelled
    },
    RetryTokenRequested => {
        TokenAcquired => RetryDispatched,
        TokenFailed => Failed,
        Cancel => Cancelled
    },
    RetryDispatched => {
        Success => Succeeded,
        OtherError => Failed,
        AuthRejected => Failed,
        Cancel => Cancelled
    }
}

pub use request_machine::Input as RequestMachineInput;
pub use request_machine::State as RequestMachineState;
pub use request_machine::StateMachine as RequestMachine;

/// Simplified view of a request's progress, for logging and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    AcquiringToken,
    Dispatched,
    RetryPending,
    Succeeded,
    Failed,
    Cancelled,
}

impl RequestPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestPhase::Succeeded | RequestPhase::Failed | RequestPhase::Cancelled
        )
    }
}

impl From<&RequestMachineState> for RequestPhase {
    fn from(state: &RequestMachineState) -> Self {
        match state {
            RequestMachineState::Idle => RequestPhase::Idle,
            RequestMachineState::TokenRequested | RequestMachineState::RetryTokenRequested => {
                RequestPhase::AcquiringToken
            }
            RequestMachineState::Dispatched | RequestMachineState::RetryDispatched => {
                RequestPhase::Dispatched
            }
            RequestMachineState::RetryPending => RequestPhase::RetryPending,
            RequestMachineState::Succeeded => RequestPhase::Succeeded,
            RequestMachineState::Failed => RequestPhase::Failed,
            RequestMachineState::Cancelled => RequestPhase::Cancelled,
        }
    }
}

/// Whether the machine is on the replay leg.
pub fn is_retry_leg(state: &RequestMachineState) -> bool {
    matches!(
        state,
        RequestMachineState::RetryPending
            | RequestMachineState::RetryTokenRequested
            | RequestMachineState::RetryDispatched
    )
}
