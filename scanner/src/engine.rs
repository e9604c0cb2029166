//! Verification engine.
//!
//! Orchestrates one scan at a time:
//!
//! ```text
//! Idle ─▶ Resolving ─▶ LookingUp ─┬─▶ Verified
//!                                 ├─▶ Invalid
//!                                 └─▶ Error
//! ```
//!
//! The remote authority is always asked first. The local cache is consulted
//! only after the authority fails, never raced against it. Every path ends in
//! a report the presenter can render; nothing here returns an error.
//!
//! Marking a ticket used is a separate, operator-triggered step that needs the
//! [`Confirmation`] handed out by a valid scan.

use crate::error::GateError;
use crate::presentation::Presentation;
use gatecheck_core::{
    AuthorityFuture, Clock, RemoteError, Resolver, ScanPayload, Ticket, TicketAuthority,
    TicketCache, TicketIdentifier, TicketStatus, VerificationOutcome, VerificationResult,
    VerificationSource,
};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

/// Upper bound on a single authority call when no policy is given
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

const CACHE_UNAVAILABLE: &str =
    "Ticket could not be verified: authority unreachable and local cache unreadable.";

/// Where the engine is in its current operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanPhase {
    /// Nothing scanned yet
    Idle,
    /// Normalizing the scan payload
    Resolving,
    /// Waiting on the authority or reading the cache
    LookingUp,
    /// Waiting on a mark-used mutation
    Confirming,
    /// Last operation ended with an admissible ticket
    Verified,
    /// Last operation ended with a refused or unknown ticket
    Invalid,
    /// Last operation could not reach a decision
    Error,
}

impl ScanPhase {
    /// Whether an operation is in flight
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Resolving | Self::LookingUp | Self::Confirming)
    }

    fn settled(outcome: &VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Unavailable { .. } => Self::Error,
            outcome if outcome.is_valid() => Self::Verified,
            _ => Self::Invalid,
        }
    }
}

/// Engine tuning
#[derive(Clone, Copy, Debug)]
pub struct EnginePolicy {
    /// Payload normalization
    pub resolver: Resolver,
    /// Trust a remote 404 instead of falling back to the cache
    pub skip_cache_on_not_found: bool,
    /// Upper bound on each authority call
    pub remote_timeout: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            resolver: Resolver::new(),
            skip_cache_on_not_found: false,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// Permission to mark a ticket used, issued only by a valid scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    identifier: TicketIdentifier,
}

impl Confirmation {
    /// Ticket this confirmation is for
    #[must_use]
    pub const fn identifier(&self) -> &TicketIdentifier {
        &self.identifier
    }
}

/// Result of one scan.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanReport {
    /// What was scanned, for echoing back to the operator
    pub scanned: String,
    /// Canonical identifier, if the payload resolved
    pub identifier: Option<TicketIdentifier>,
    /// Decision and its source
    pub outcome: VerificationOutcome,
}

impl ScanReport {
    /// The result to render
    #[must_use]
    pub fn result(&self) -> VerificationResult {
        self.outcome.result()
    }

    /// Confirmation for the mark-used step; `None` unless the ticket is valid.
    #[must_use]
    pub fn confirmation(&self) -> Option<Confirmation> {
        if !self.outcome.is_valid() {
            return None;
        }
        self.identifier.clone().map(|identifier| Confirmation { identifier })
    }

    /// View model for the presenter
    #[must_use]
    pub fn presentation(&self) -> Presentation {
        Presentation::from_report(self)
    }
}

/// How a mark-used confirmation ended
#[derive(Clone, Debug, PartialEq)]
pub enum ConfirmOutcome {
    /// The authority marked the ticket used; `refreshed` is a fresh verification
    Remote {
        /// Authority message
        message: String,
        /// Verification run right after the mutation
        refreshed: VerificationOutcome,
    },
    /// The authority answered but refused (typically: already used)
    Rejected {
        /// Authority message, surfaced as-is
        message: String,
        /// Verification run right after the refusal
        refreshed: VerificationOutcome,
    },
    /// The authority failed and the ticket was marked used in the local cache
    Fallback(VerificationResult),
    /// The authority failed and the cache has no matching ticket
    NotFound,
    /// The authority failed and the cache could not be updated
    Unavailable {
        /// What went wrong, suitable for display
        message: String,
    },
}

impl ConfirmOutcome {
    /// The result to render after the confirmation
    #[must_use]
    pub fn result(&self) -> VerificationResult {
        match self {
            Self::Remote { refreshed, .. } | Self::Rejected { refreshed, .. } => refreshed.result(),
            Self::Fallback(result) => result.clone(),
            Self::NotFound => VerificationResult::not_found(),
            Self::Unavailable { message } => VerificationResult::invalid(message.clone()),
        }
    }

    /// Ticket status after the confirmation, as far as the engine knows
    #[must_use]
    pub fn ticket_status(&self) -> Option<TicketStatus> {
        self.result().ticket_status()
    }

    /// Which source handled the mutation
    #[must_use]
    pub const fn source(&self) -> Option<VerificationSource> {
        match self {
            Self::Remote { .. } | Self::Rejected { .. } => Some(VerificationSource::Remote),
            Self::Fallback(_) | Self::NotFound => Some(VerificationSource::Fallback),
            Self::Unavailable { .. } => None,
        }
    }

    /// Whether this call moved the ticket to `USED` somewhere
    #[must_use]
    pub const fn is_marked(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Fallback(_))
    }

    /// One-line message for the operator
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Remote { message, .. } if !message.is_empty() => message,
            Self::Remote { .. } => "Ticket marked as used.",
            Self::Rejected { message, .. } if !message.is_empty() => message,
            Self::Rejected { .. } => "The ticket authority refused to mark this ticket used.",
            Self::Fallback(_) => "Ticket marked as used (offline).",
            Self::NotFound => "Ticket not found.",
            Self::Unavailable { message } => message,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Remote { .. } => "remote",
            Self::Rejected { .. } => "rejected",
            Self::Fallback(_) => "fallback",
            Self::NotFound => "not_found",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Result of a mark-used confirmation.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmReport {
    /// Ticket the confirmation was for
    pub identifier: TicketIdentifier,
    /// What happened
    pub outcome: ConfirmOutcome,
}

impl ConfirmReport {
    /// One-line message for the operator
    #[must_use]
    pub fn message(&self) -> &str {
        self.outcome.message()
    }

    /// View model for the presenter, rendering the post-confirmation state
    #[must_use]
    pub fn presentation(&self) -> Presentation {
        Presentation::from_confirm(self)
    }
}

/// Gate verification engine.
///
/// At most one `verify`/`confirm_used` runs at a time per engine; see
/// [`VerificationEngine::verify`] and [`VerificationEngine::try_verify`] for
/// the two ways a concurrent scan is handled.
pub struct VerificationEngine {
    authority: Arc<dyn TicketAuthority>,
    cache: Arc<TicketCache>,
    clock: Arc<dyn Clock>,
    policy: EnginePolicy,
    in_flight: Mutex<()>,
    phase: watch::Sender<ScanPhase>,
}

impl VerificationEngine {
    /// Engine with the default policy.
    #[must_use]
    pub fn new(
        authority: Arc<dyn TicketAuthority>,
        cache: Arc<TicketCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (phase, _) = watch::channel(ScanPhase::Idle);
        Self {
            authority,
            cache,
            clock,
            policy: EnginePolicy::default(),
            in_flight: Mutex::new(()),
            phase,
        }
    }

    /// Replaces the policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current policy
    #[must_use]
    pub const fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// The local fallback cache
    #[must_use]
    pub fn cache(&self) -> &TicketCache {
        &self.cache
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    /// Watch phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScanPhase> {
        self.phase.subscribe()
    }

    /// Verify a scan, waiting for any in-flight operation to finish first.
    pub async fn verify(&self, payload: impl Into<ScanPayload>) -> ScanReport {
        let _guard = self.in_flight.lock().await;
        self.run_verify(payload.into()).await
    }

    /// Verify a scan unless another operation is in flight.
    ///
    /// Returns `None` without touching either source when busy; suited to a
    /// camera that keeps decoding the same code while a lookup is pending.
    pub async fn try_verify(&self, payload: impl Into<ScanPayload>) -> Option<ScanReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Scan ignored, another verification is in flight");
            counter!("gatecheck_scans_ignored_total").increment(1);
            return None;
        };
        Some(self.run_verify(payload.into()).await)
    }

    /// Mark a ticket used, then report its fresh status.
    ///
    /// The authority is tried once; on any transport failure the ticket is
    /// marked used in the local cache instead. There is no retry.
    pub async fn confirm_used(&self, confirmation: Confirmation) -> ConfirmReport {
        let _guard = self.in_flight.lock().await;
        self.enter(ScanPhase::Confirming);

        let identifier = confirmation.identifier;
        let outcome = match self.remote(self.authority.mark_used(&identifier)).await {
            Ok(receipt) if receipt.success => {
                info!(identifier = %identifier, "Ticket authority marked ticket used");
                self.mirror_remote_use(&identifier, receipt.ticket.as_ref());
                let refreshed = self.verify_identifier(&identifier).await;
                ConfirmOutcome::Remote {
                    message: receipt.message,
                    refreshed,
                }
            },
            Ok(receipt) => {
                warn!(
                    identifier = %identifier,
                    message = %receipt.message,
                    "Ticket authority refused to mark ticket used"
                );
                let refreshed = self.verify_identifier(&identifier).await;
                ConfirmOutcome::Rejected {
                    message: receipt.message,
                    refreshed,
                }
            },
            Err(err) => {
                warn!(
                    identifier = %identifier,
                    error = %err,
                    "Mark-used request failed, marking ticket in local cache"
                );
                counter!("gatecheck_fallback_total", "operation" => "mark_used", "reason" => err.kind())
                    .increment(1);
                self.mark_used_cached(&identifier)
            },
        };

        counter!("gatecheck_confirmations_total", "outcome" => outcome.label()).increment(1);
        self.enter(match &outcome {
            ConfirmOutcome::Unavailable { .. } => ScanPhase::Error,
            outcome if outcome.result().valid => ScanPhase::Verified,
            _ => ScanPhase::Invalid,
        });

        ConfirmReport { identifier, outcome }
    }

    /// Reseed the local cache from the authority's list of the user's tickets.
    ///
    /// Local `USED` marks survive the refresh. Returns the cached ticket count.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Remote`] if the list cannot be fetched and
    /// [`GateError::Cache`] if the cache cannot be written.
    pub async fn refresh_cache(&self) -> Result<usize, GateError> {
        let tickets = self.remote(self.authority.list_tickets()).await?;
        let count = self.cache.merge_snapshot(tickets)?;
        info!(count, slot = %self.cache.slot(), "Refreshed local ticket cache");
        Ok(count)
    }

    async fn run_verify(&self, payload: ScanPayload) -> ScanReport {
        self.enter(ScanPhase::Resolving);

        let identifier = match self.policy.resolver.resolve(&payload) {
            Ok(identifier) => identifier,
            Err(err) => {
                debug!(error = %err, "Scan payload rejected");
                let outcome = VerificationOutcome::Unresolvable {
                    message: err.to_string(),
                };
                self.enter(ScanPhase::settled(&outcome));
                return ScanReport {
                    scanned: payload.text().trim().to_string(),
                    identifier: None,
                    outcome,
                };
            },
        };

        let outcome = self.verify_identifier(&identifier).await;
        self.enter(ScanPhase::settled(&outcome));

        ScanReport {
            scanned: identifier.to_string(),
            identifier: Some(identifier),
            outcome,
        }
    }

    async fn verify_identifier(&self, identifier: &TicketIdentifier) -> VerificationOutcome {
        self.enter(ScanPhase::LookingUp);

        let outcome = match self.remote(self.authority.lookup(identifier)).await {
            Ok(result) => {
                info!(identifier = %identifier, valid = result.valid, "Ticket authority answered");
                VerificationOutcome::Remote(result)
            },
            Err(err) if err.is_not_found() && self.policy.skip_cache_on_not_found => {
                info!(identifier = %identifier, "Ticket authority does not know this ticket");
                VerificationOutcome::Remote(VerificationResult::not_found())
            },
            Err(err) => {
                warn!(
                    identifier = %identifier,
                    error = %err,
                    "Ticket authority lookup failed, checking local cache"
                );
                counter!("gatecheck_fallback_total", "operation" => "lookup", "reason" => err.kind())
                    .increment(1);
                self.lookup_cached(identifier)
            },
        };

        if let Some(source) = outcome.source() {
            counter!("gatecheck_verifications_total", "source" => source.as_str()).increment(1);
        }
        outcome
    }

    fn lookup_cached(&self, identifier: &TicketIdentifier) -> VerificationOutcome {
        match self.cache.find_by_identifier(identifier) {
            Ok(ticket) => {
                info!(
                    identifier = %identifier,
                    ticket_id = %ticket.id,
                    status = %ticket.status,
                    "Answered from local cache"
                );
                VerificationOutcome::Fallback(VerificationResult::from_cached(ticket))
            },
            Err(err) if err.is_not_found() => {
                info!(identifier = %identifier, "Ticket not in local cache");
                VerificationOutcome::ExhaustedNotFound
            },
            Err(err) => {
                error!(identifier = %identifier, error = %err, "Local cache unreadable");
                VerificationOutcome::Unavailable {
                    message: CACHE_UNAVAILABLE.to_string(),
                }
            },
        }
    }

    fn mark_used_cached(&self, identifier: &TicketIdentifier) -> ConfirmOutcome {
        match self.cache.mark_used(identifier, self.clock.now()) {
            Ok(ticket) => {
                info!(identifier = %identifier, ticket_id = %ticket.id, "Marked ticket used offline");
                ConfirmOutcome::Fallback(VerificationResult::already_used(ticket))
            },
            Err(err) if err.is_not_found() => {
                info!(identifier = %identifier, "Ticket to mark not in local cache");
                ConfirmOutcome::NotFound
            },
            Err(err) => {
                error!(identifier = %identifier, error = %err, "Local cache not writable");
                ConfirmOutcome::Unavailable {
                    message: CACHE_UNAVAILABLE.to_string(),
                }
            },
        }
    }

    /// Keeps the cache's shadow copy in step with an accepted remote mutation.
    ///
    /// Only a cached ticket carrying the same `id` or `ticket_uuid` as the
    /// authority's ticket (or, without one, the scanned identifier verbatim)
    /// is marked. Loose matches are never mirrored.
    fn mirror_remote_use(&self, identifier: &TicketIdentifier, ticket: Option<&Ticket>) {
        let at = ticket.and_then(|t| t.used_at).unwrap_or_else(|| self.clock.now());
        let keys: Vec<String> = match ticket {
            Some(ticket) => ticket
                .ticket_uuid
                .iter()
                .cloned()
                .chain(std::iter::once(ticket.id.to_string()))
                .collect(),
            None => vec![identifier.to_string()],
        };

        match self.cache.mark_used_exact(&keys, at) {
            Ok(_) => debug!(identifier = %identifier, "Mirrored remote use into local cache"),
            Err(err) if err.is_not_found() => {
                debug!(identifier = %identifier, "No exact cache entry to mirror remote use into");
            },
            Err(err) => warn!(identifier = %identifier, error = %err, "Could not mirror remote use"),
        }
    }

    async fn remote<T>(&self, call: AuthorityFuture<'_, T>) -> Result<T, RemoteError> {
        tokio::time::timeout(self.policy.remote_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Unreachable(format!(
                    "no answer within {}ms",
                    self.policy.remote_timeout.as_millis()
                )))
            })
    }

    fn enter(&self, phase: ScanPhase) {
        self.phase.send_replace(phase);
    }
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
