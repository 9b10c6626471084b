//! Auth-gated request execution.
//!
//! Every operation against the domain API follows the same protocol: get a
//! token for the account, dispatch, and when the server rejects the token,
//! invalidate it and replay the same operation exactly once. Results are
//! delivered only to requesters whose [`RequestScope`] is still live.

mod error;
mod executor;
mod request_fsm;
mod scope;
mod transport;

pub use error::{ErrorKind, GatedError, RequestFailure};
pub use executor::{AuthGatedExecutor, Classification, TokenSource};
pub use request_fsm::request_machine;
pub use request_fsm::{RequestMachine, RequestMachineInput, RequestMachineState, RequestPhase};
pub use reqwest::Method;
pub use scope::{RequestScope, ScopeTicket};
pub use transport::{
    classify_transport_error, ApiRequest, ApiResponse, HttpTransport, Transport, TransportError,
};
