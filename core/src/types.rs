//! Domain types for gate verification.
//!
//! Tickets arrive from two places: the remote ticket authority (authoritative)
//! and the on-device cache (a stale shadow copy of the signed-in user's own
//! tickets). Both are decoded into the same [`Ticket`] shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Canonical ticket identifier produced by the resolver.
///
/// Nominally a UUID, but no format is enforced: different QR generation paths
/// emit UUIDs, bare numeric ids or prefixed strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketIdentifier(String);

impl TicketIdentifier {
    /// Wraps an already canonical identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TicketIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TicketIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Primary key of a ticket record.
///
/// The authority keys tickets by UUID string while older cache snapshots carry
/// a numeric database id, so both shapes must decode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TicketKey {
    /// Numeric database id
    Number(i64),
    /// String id (UUID or free-form reference)
    Text(String),
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for TicketKey {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for TicketKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TicketKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// Lifecycle status of a ticket.
///
/// The only transition is `Valid → Used`; nothing moves a ticket back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    /// Not yet scanned through the gate
    #[default]
    Valid,
    /// Already admitted
    Used,
}

impl TicketStatus {
    /// Returns `true` for [`TicketStatus::Used`]
    #[must_use]
    pub const fn is_used(self) -> bool {
        matches!(self, Self::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("VALID"),
            Self::Used => f.write_str("USED"),
        }
    }
}

/// Match details attached to a ticket by the authority.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetails {
    /// Kick-off time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Home team name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_home_name: Option<String>,
    /// Away team name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_away_name: Option<String>,
    /// Stadium name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stadium_name: Option<String>,
}

/// A match ticket as seen by either the authority or the local cache.
///
/// Fields this crate does not know about are kept in `extra` so that rewriting
/// the cache slot never drops data written by other clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Primary key
    pub id: TicketKey,
    /// UUID encoded in the ticket's QR code, when different from `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_uuid: Option<String>,
    /// Current status; payloads without one are treated as valid
    #[serde(default)]
    pub status: TicketStatus,
    /// When the ticket was marked used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
    /// Match details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_details: Option<EventDetails>,
    /// Ticket category (`SILVER`, `GOLD`, `PLATINUM`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Ticket type label, preferred over `category` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_type: Option<String>,
    /// Seat label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,
    /// Seat label under its legacy key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_number: Option<String>,
    /// Unrecognized fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Ticket {
    /// Creates a valid ticket with only an id set.
    #[must_use]
    pub fn new(id: impl Into<TicketKey>) -> Self {
        Self {
            id: id.into(),
            ticket_uuid: None,
            status: TicketStatus::Valid,
            used_at: None,
            event_details: None,
            category: None,
            ticket_type: None,
            seat: None,
            seat_number: None,
            extra: Map::new(),
        }
    }

    /// Sets the QR UUID.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.ticket_uuid = Some(uuid.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Returns the ticket already marked used at `at`.
    #[must_use]
    pub fn used(mut self, at: DateTime<Utc>) -> Self {
        self.status = TicketStatus::Used;
        self.used_at = Some(at);
        self
    }

    /// Returns `true` once the ticket has been through the gate
    #[must_use]
    pub const fn is_used(&self) -> bool {
        self.status.is_used()
    }

    /// Moves the ticket to `Used`.
    ///
    /// Returns `false` if it was already used. A used ticket keeps its
    /// original timestamp; one that somehow lacks a timestamp gets `at`.
    pub fn mark_used(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_used() {
            if self.used_at.is_none() {
                self.used_at = Some(at);
            }
            return false;
        }

        self.status = TicketStatus::Used;
        self.used_at = Some(at);
        true
    }

    /// Ticket type label, falling back to the category
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.ticket_type.as_deref().or(self.category.as_deref())
    }

    /// Seat label under either key
    #[must_use]
    pub fn seat_label(&self) -> Option<&str> {
        self.seat.as_deref().or(self.seat_number.as_deref())
    }

    /// The value the purchase app encodes into this ticket's QR code.
    #[must_use]
    pub fn qr_payload(&self) -> String {
        match &self.ticket_uuid {
            Some(uuid) if !uuid.is_empty() => uuid.clone(),
            _ => self.id.to_string(),
        }
    }
}

// ============================================================================
// Verification results
// ============================================================================

/// Outcome of one verification attempt, as rendered by the presenter.
///
/// This is also the wire shape of `GET /tickets/verify/{identifier}/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the holder may enter
    pub valid: bool,
    /// Human-readable explanation
    #[serde(default)]
    pub message: String,
    /// The ticket, when one was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
    /// Prior-use timestamp for already used tickets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl VerificationResult {
    /// A ticket that may enter.
    #[must_use]
    pub fn valid(ticket: Ticket) -> Self {
        Self {
            valid: true,
            message: "Valid ticket.".to_string(),
            ticket: Some(ticket),
            used_at: None,
        }
    }

    /// A ticket that has already been through the gate.
    #[must_use]
    pub fn already_used(ticket: Ticket) -> Self {
        Self {
            valid: false,
            message: "This ticket has already been used.".to_string(),
            used_at: ticket.used_at,
            ticket: Some(ticket),
        }
    }

    /// An identifier neither source knows.
    #[must_use]
    pub fn not_found() -> Self {
        Self::invalid("Ticket not found in the system.")
    }

    /// An invalid result with no ticket attached.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            ticket: None,
            used_at: None,
        }
    }

    /// Decision for a ticket found in the local cache.
    #[must_use]
    pub fn from_cached(ticket: Ticket) -> Self {
        if ticket.is_used() {
            Self::already_used(ticket)
        } else {
            Self::valid(ticket)
        }
    }

    /// Best knowledge of the ticket's status carried by this result.
    ///
    /// A prior-use timestamp means `Used` even when the attached ticket
    /// omits its status.
    #[must_use]
    pub fn ticket_status(&self) -> Option<TicketStatus> {
        if self.used_at.is_some() {
            return Some(TicketStatus::Used);
        }
        self.ticket.as_ref().map(|t| t.status)
    }
}

/// Envelope returned by `POST /tickets/verify/{identifier}/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkUsedReceipt {
    /// Whether the authority accepted the mutation
    pub success: bool,
    /// Authority message, surfaced as-is
    #[serde(default)]
    pub message: String,
    /// Updated ticket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
}

/// Which source produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSource {
    /// The remote ticket authority
    Remote,
    /// The on-device cache
    Fallback,
}

impl VerificationSource {
    /// Stable label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Fallback => "fallback",
        }
    }
}

/// Tagged verification outcome, recording which source answered.
///
/// Every path through the engine ends in one of these; none of them is an
/// error to the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationOutcome {
    /// The authority answered
    Remote(VerificationResult),
    /// The authority failed and the cache answered
    Fallback(VerificationResult),
    /// The authority failed and the cache has no matching ticket
    ExhaustedNotFound,
    /// The scan could not be turned into an identifier
    Unresolvable {
        /// Why the payload was rejected
        message: String,
    },
    /// The authority failed and the cache could not be read
    Unavailable {
        /// What went wrong, suitable for display
        message: String,
    },
}

impl VerificationOutcome {
    /// The result to render.
    #[must_use]
    pub fn result(&self) -> VerificationResult {
        self.clone().into_result()
    }

    /// Consumes the outcome into the result to render.
    #[must_use]
    pub fn into_result(self) -> VerificationResult {
        match self {
            Self::Remote(result) | Self::Fallback(result) => result,
            Self::ExhaustedNotFound => VerificationResult::not_found(),
            Self::Unresolvable { message } | Self::Unavailable { message } => {
                VerificationResult::invalid(message)
            },
        }
    }

    /// Source that produced a ticket decision, if any.
    #[must_use]
    pub const fn source(&self) -> Option<VerificationSource> {
        match self {
            Self::Remote(_) => Some(VerificationSource::Remote),
            Self::Fallback(_) | Self::ExhaustedNotFound => Some(VerificationSource::Fallback),
            Self::Unresolvable { .. } | Self::Unavailable { .. } => None,
        }
    }

    /// Whether the holder may enter
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        match self {
            Self::Remote(result) | Self::Fallback(result) => result.valid,
            _ => false,
        }
    }
}
