//! Scripted ticket authority.

use gatecheck_core::{
    AuthorityFuture, Clock, MarkUsedReceipt, RemoteError, Ticket, TicketAuthority,
    TicketIdentifier, VerificationResult,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::mocks::test_clock;

/// How the scripted authority answers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Serve from the scripted ticket table
    Online,
    /// Every call fails as unreachable
    Offline,
    /// Every call fails with this HTTP status
    ServerError(u16),
    /// Every call returns an undecodable body
    Malformed,
}

/// A call the engine made
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorityCall {
    /// `lookup(identifier)`
    Lookup(String),
    /// `mark_used(identifier)`
    MarkUsed(String),
    /// `list_tickets()`
    ListTickets,
}

#[derive(Debug)]
struct Script {
    tickets: Vec<Ticket>,
    lookup_mode: AuthorityMode,
    mutation_mode: AuthorityMode,
    calls: Vec<AuthorityCall>,
}

/// In-memory [`TicketAuthority`] with switchable failure modes.
///
/// Tickets are found by exact `id` or `ticket_uuid`, the way the real
/// authority resolves them.
pub struct ScriptedAuthority {
    script: Mutex<Script>,
    clock: Arc<dyn Clock>,
    latency: Option<Duration>,
}

impl ScriptedAuthority {
    /// Online authority with no tickets, stamping uses with [`test_clock`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                tickets: Vec::new(),
                lookup_mode: AuthorityMode::Online,
                mutation_mode: AuthorityMode::Online,
                calls: Vec::new(),
            }),
            clock: Arc::new(test_clock()),
            latency: None,
        }
    }

    /// Authority that fails every call as unreachable
    #[must_use]
    pub fn offline() -> Self {
        let authority = Self::new();
        authority.set_mode(AuthorityMode::Offline);
        authority
    }

    /// Adds a ticket the authority knows.
    #[must_use]
    pub fn with_ticket(self, ticket: Ticket) -> Self {
        self.script().tickets.push(ticket);
        self
    }

    /// Uses `clock` to stamp accepted mutations.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delays every answer, to hold a call in flight.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sets the mode for lookups and mutations alike.
    pub fn set_mode(&self, mode: AuthorityMode) {
        let mut script = self.script();
        script.lookup_mode = mode.clone();
        script.mutation_mode = mode;
    }

    /// Sets the mode for lookups only.
    pub fn set_lookup_mode(&self, mode: AuthorityMode) {
        self.script().lookup_mode = mode;
    }

    /// Sets the mode for mutations only.
    pub fn set_mutation_mode(&self, mode: AuthorityMode) {
        self.script().mutation_mode = mode;
    }

    /// Calls received so far, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.script().calls.clone()
    }

    /// The authority's current view of a ticket
    #[must_use]
    pub fn ticket(&self, identifier: &str) -> Option<Ticket> {
        let script = self.script();
        Self::position(&script.tickets, identifier).map(|i| script.tickets[i].clone())
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn position(tickets: &[Ticket], identifier: &str) -> Option<usize> {
        tickets.iter().position(|t| {
            t.id.to_string() == identifier || t.ticket_uuid.as_deref() == Some(identifier)
        })
    }

    fn failure(mode: &AuthorityMode) -> Option<RemoteError> {
        match mode {
            AuthorityMode::Online => None,
            AuthorityMode::Offline => {
                Some(RemoteError::Unreachable("connection refused".to_string()))
            },
            AuthorityMode::ServerError(status) => Some(RemoteError::UnexpectedStatus {
                status: *status,
                body: "scripted failure".to_string(),
            }),
            AuthorityMode::Malformed => {
                Some(RemoteError::Malformed("expected value at line 1 column 1".to_string()))
            },
        }
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn answer_lookup(&self, identifier: &str) -> Result<VerificationResult, RemoteError> {
        let mut script = self.script();
        script.calls.push(AuthorityCall::Lookup(identifier.to_string()));

        if let Some(err) = Self::failure(&script.lookup_mode) {
            return Err(err);
        }

        let Some(position) = Self::position(&script.tickets, identifier) else {
            return Err(RemoteError::NotFound {
                identifier: identifier.to_string(),
            });
        };

        let ticket = script.tickets[position].clone();
        Ok(if ticket.is_used() {
            VerificationResult {
                valid: false,
                message: "Ticket already used.".to_string(),
                used_at: ticket.used_at,
                ticket: Some(ticket),
            }
        } else {
            VerificationResult::valid(ticket)
        })
    }

    fn answer_mark_used(&self, identifier: &str) -> Result<MarkUsedReceipt, RemoteError> {
        let now = self.clock.now();
        let mut script = self.script();
        script.calls.push(AuthorityCall::MarkUsed(identifier.to_string()));

        if let Some(err) = Self::failure(&script.mutation_mode) {
            return Err(err);
        }

        let Some(position) = Self::position(&script.tickets, identifier) else {
            return Err(RemoteError::NotFound {
                identifier: identifier.to_string(),
            });
        };

        let ticket = &mut script.tickets[position];
        if ticket.mark_used(now) {
            Ok(MarkUsedReceipt {
                success: true,
                message: "Ticket marked as used.".to_string(),
                ticket: Some(ticket.clone()),
            })
        } else {
            Ok(MarkUsedReceipt {
                success: false,
                message: "Ticket already used.".to_string(),
                ticket: Some(ticket.clone()),
            })
        }
    }

    fn answer_list(&self) -> Result<Vec<Ticket>, RemoteError> {
        let mut script = self.script();
        script.calls.push(AuthorityCall::ListTickets);

        if let Some(err) = Self::failure(&script.lookup_mode) {
            return Err(err);
        }
        Ok(script.tickets.clone())
    }
}

impl Default for ScriptedAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketAuthority for ScriptedAuthority {
    fn lookup(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, VerificationResult> {
        let identifier = identifier.to_string();
        Box::pin(async move {
            self.pause().await;
            self.answer_lookup(&identifier)
        })
    }

    fn mark_used(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, MarkUsedReceipt> {
        let identifier = identifier.to_string();
        Box::pin(async move {
            self.pause().await;
            self.answer_mark_used(&identifier)
        })
    }

    fn list_tickets(&self) -> AuthorityFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.pause().await;
            self.answer_list()
        })
    }
}
