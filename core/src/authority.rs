//! The remote ticket authority seam.

use crate::error::RemoteError;
use crate::types::{MarkUsedReceipt, Ticket, TicketIdentifier, VerificationResult};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`TicketAuthority`] methods
pub type AuthorityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Remote ticket authority
///
/// Abstraction over the ticketing backend. Production uses the HTTP client in
/// `gatecheck-scanner`; tests use a scripted double.
pub trait TicketAuthority: Send + Sync {
    /// Ask the authority whether a ticket is valid.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] when the authority does not know the
    /// identifier, and a transport variant for every other failure.
    fn lookup(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, VerificationResult>;

    /// Ask the authority to mark a ticket used.
    ///
    /// A rejected mutation (for example a second call on a used ticket) comes
    /// back as `Ok` with `success == false`.
    ///
    /// # Errors
    ///
    /// Returns a transport variant when the authority cannot be reached or
    /// answers with a non-2xx status.
    fn mark_used(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, MarkUsedReceipt>;

    /// List the signed-in user's tickets, used to seed the local cache.
    ///
    /// # Errors
    ///
    /// Returns a transport variant on any failure.
    fn list_tickets(&self) -> AuthorityFuture<'_, Vec<Ticket>>;
}
