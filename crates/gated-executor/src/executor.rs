//! The auth-gated request executor.

use crate::error::GatedError;
use crate::request_fsm::{is_retry_leg, RequestMachine, RequestMachineInput, RequestPhase};
use crate::scope::ScopeTicket;
use crate::transport::{classify_transport_error, ApiRequest, ApiResponse, Transport, TransportError};
use async_trait::async_trait;
use auth_engine::{AcquireMode, AuthError, AuthResult, TokenProvider};
use credential_store::AccountId;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};
use uuid::Uuid;

/// Source of tokens for the executor.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Cached or freshly exchanged token.
    async fn acquire(&self, account: &AccountId) -> AuthResult<String>;

    /// Discard `token` after the server rejected it.
    async fn invalidate(&self, account: &AccountId, token: &str) -> AuthResult<bool>;
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn acquire(&self, account: &AccountId) -> AuthResult<String> {
        TokenProvider::acquire(self, account, AcquireMode::Interactive).await
    }

    async fn invalidate(&self, account: &AccountId, token: &str) -> AuthResult<bool> {
        TokenProvider::invalidate(self, account, token).await
    }
}

/// How a request error relates to the token that was attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The server rejected the token.
    AuthFailure,
    Other,
}

/// Wraps request-issuing closures with token acquisition and a single
/// invalidate-and-replay on authorization failure.
///
/// For one logical operation the sequence is strictly
/// acquire → dispatch → [invalidate → acquire → dispatch] → deliver.
#[derive(Clone)]
pub struct AuthGatedExecutor {
    tokens: Arc<dyn TokenSource>,
}

impl AuthGatedExecutor {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self { tokens }
    }

    /// Run an operation for `account` and return its outcome.
    ///
    /// `dispatch` is invoked with the token for each attempt (at most two).
    /// Returns `None` when `ticket` stopped being live before the outcome
    /// could be delivered; the in-flight attempt is dropped with it.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        ticket: ScopeTicket,
        account: &AccountId,
        dispatch: F,
        classify: C,
    ) -> Option<Result<T, GatedError<E>>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
    {
        let operation = Uuid::new_v4();
        let span = tracing::debug_span!("gated_request", %operation, account = %account);

        let mut stop = ticket.clone();
        let outcome = async {
            tokio::select! {
                biased;
                _ = stop.stopped() => None,
                result = self.drive(account, dispatch, classify) => Some(result),
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match outcome {
            Some(result) if ticket.is_live() => Some(result),
            Some(_) => {
                debug!("Result received after requester stopped, discarding");
                None
            }
            None => {
                debug!("Requester stopped, dropping in-flight operation");
                None
            }
        })
    }

    /// Like [`run`](Self::run) on a background task; `deliver` is invoked
    /// only while `ticket` is live.
    pub fn spawn<T, E, F, Fut, C, D>(
        &self,
        ticket: ScopeTicket,
        account: AccountId,
        dispatch: F,
        classify: C,
        deliver: D,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnMut(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: Fn(&E) -> Classification + Send + Sync + 'static,
        D: FnOnce(Result<T, GatedError<E>>) + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move {
            let guard = ticket.clone();
            if let Some(result) = executor.run(ticket, &account, dispatch, classify).await {
                // Teardown may race with the end of `run`.
                if guard.is_live() {
                    deliver(result);
                }
            }
        })
    }

    /// Send `request` through `transport` with the gated retry policy.
    pub async fn send(
        &self,
        ticket: ScopeTicket,
        account: &AccountId,
        transport: Arc<dyn Transport>,
        request: ApiRequest,
    ) -> Option<Result<ApiResponse, GatedError<TransportError>>> {
        self.run(
            ticket,
            account,
            |token| {
                let transport = transport.clone();
                let request = request.clone();
                async move { transport.send(&token, request).await }
            },
            classify_transport_error,
        )
        .await
    }

    async fn drive<T, E, F, Fut, C>(
        &self,
        account: &AccountId,
        mut dispatch: F,
        classify: C,
    ) -> Result<T, GatedError<E>>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
    {
        let mut machine = RequestMachine::new();
        advance::<E>(&mut machine, RequestMachineInput::Begin)?;

        // Error of the first rejected attempt, kept while on the retry leg.
        let mut first_rejection: Option<E> = None;

        loop {
            let token = match self.tokens.acquire(account).await {
                Ok(token) => token,
                Err(error) => {
                    advance::<E>(&mut machine, RequestMachineInput::TokenFailed)?;
                    return Err(acquisition_failure(error, first_rejection.take()));
                }
            };
            advance::<E>(&mut machine, RequestMachineInput::TokenAcquired)?;
            debug!(retry = first_rejection.is_some(), "Dispatching");

            let error = match dispatch(token.clone()).await {
                Ok(value) => {
                    advance::<E>(&mut machine, RequestMachineInput::Success)?;
                    debug!("Request succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if classify(&error) == Classification::Other {
                advance::<E>(&mut machine, RequestMachineInput::OtherError)?;
                debug!("Request failed");
                return Err(GatedError::Request(error));
            }

            advance::<E>(&mut machine, RequestMachineInput::AuthRejected)?;
            if !is_retry_leg(machine.state()) {
                debug!("Token rejected again, giving up");
                return Err(GatedError::AuthFailure(error));
            }

            debug!("Token rejected, invalidating and retrying once");
            if let Err(invalidate_error) = self.tokens.invalidate(account, &token).await {
                advance::<E>(&mut machine, RequestMachineInput::TokenFailed)?;
                return Err(GatedError::from_acquisition(invalidate_error));
            }
            advance::<E>(&mut machine, RequestMachineInput::Invalidated)?;
            first_rejection = Some(error);
        }
    }
}

/// Map a failed acquisition, taking the leg into account.
///
/// On the retry leg anything that would need an interactive prompt is the
/// terminal authorization failure of the first attempt.
fn acquisition_failure<E>(error: AuthError, first_rejection: Option<E>) -> GatedError<E> {
    match (GatedError::from_acquisition(error), first_rejection) {
        (GatedError::CredentialsRequired, Some(rejection)) => GatedError::AuthFailure(rejection),
        (mapped, _) => mapped,
    }
}

fn advance<E>(
    machine: &mut RequestMachine,
    input: RequestMachineInput,
) -> Result<(), GatedError<E>> {
    machine.consume(&input).map_err(|_| {
        GatedError::InvalidTransition(format!(
            "Cannot apply {:?} in state {:?}",
            input,
            machine.state()
        ))
    })?;
    debug!(phase = ?RequestPhase::from(machine.state()), "Request phase");
    Ok(())
}
