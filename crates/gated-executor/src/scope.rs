//! Request scopes: delivery guards tied to the lifetime of the caller.

use tokio::sync::watch;

/// Owner-side handle of a cancellation scope (one per screen, coordinator,
/// or any other context that receives results).
///
/// Every [`teardown`](Self::teardown) bumps the generation; tickets issued
/// for an older generation stop being live. Dropping the scope stops all of
/// its tickets.
#[derive(Debug)]
pub struct RequestScope {
    generation: watch::Sender<u64>,
}

impl RequestScope {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Issue a ticket for the current generation.
    pub fn ticket(&self) -> ScopeTicket {
        let receiver = self.generation.subscribe();
        let issued = *receiver.borrow();
        ScopeTicket { issued, receiver }
    }

    /// Stop every outstanding ticket. Tickets issued afterwards are live.
    pub fn teardown(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Requester-side guard checked before any result is delivered.
#[derive(Debug, Clone)]
pub struct ScopeTicket {
    issued: u64,
    receiver: watch::Receiver<u64>,
}

impl ScopeTicket {
    /// Whether the issuing scope still wants results.
    pub fn is_live(&self) -> bool {
        self.receiver.has_changed().is_ok() && *self.receiver.borrow() == self.issued
    }

    /// Resolves once the ticket is no longer live.
    pub async fn stopped(&mut self) {
        while self.is_live() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
