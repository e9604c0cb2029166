//! View model handed to whatever renders a scan result.

use crate::engine::{ConfirmOutcome, ConfirmReport, ScanReport};
use gatecheck_core::{
    DateTime, Ticket, TicketStatus, Utc, VerificationOutcome, VerificationResult,
    VerificationSource,
};
use std::fmt;

/// What the operator should be shown after a scan or a confirmation.
///
/// Every variant echoes the scanned identifier.
#[derive(Clone, Debug, PartialEq)]
pub enum Presentation {
    /// The holder may enter
    Valid {
        /// Scanned identifier
        scanned: String,
        /// Decision message
        message: String,
        /// Ticket details, when known
        ticket: Option<Ticket>,
        /// Whether a mark-used confirmation may be offered
        can_confirm: bool,
        /// Decided from the local cache
        offline: bool,
    },
    /// The ticket was already used
    AlreadyUsed {
        /// Scanned identifier
        scanned: String,
        /// Decision message
        message: String,
        /// When it was used, if known
        used_at: Option<DateTime<Utc>>,
        /// Decided from the local cache
        offline: bool,
    },
    /// Neither source knows the ticket, or the scan was unreadable
    NotFound {
        /// Scanned identifier
        scanned: String,
        /// Decision message
        message: String,
    },
    /// No decision could be reached
    Unavailable {
        /// Scanned identifier
        scanned: String,
        /// What went wrong
        message: String,
    },
}

impl Presentation {
    /// Presentation for a scan.
    #[must_use]
    pub fn from_report(report: &ScanReport) -> Self {
        if let VerificationOutcome::Unavailable { message } = &report.outcome {
            return Self::Unavailable {
                scanned: report.scanned.clone(),
                message: message.clone(),
            };
        }
        Self::classify(
            &report.scanned,
            report.result(),
            report.outcome.source(),
            report.confirmation().is_some(),
        )
    }

    /// Presentation for the state after a confirmation.
    #[must_use]
    pub fn from_confirm(report: &ConfirmReport) -> Self {
        let scanned = report.identifier.to_string();
        if let ConfirmOutcome::Unavailable { message } = &report.outcome {
            return Self::Unavailable {
                scanned,
                message: message.clone(),
            };
        }
        Self::classify(&scanned, report.outcome.result(), report.outcome.source(), false)
    }

    fn classify(
        scanned: &str,
        result: VerificationResult,
        source: Option<VerificationSource>,
        can_confirm: bool,
    ) -> Self {
        let scanned = scanned.to_string();
        let offline = source == Some(VerificationSource::Fallback);

        if result.valid {
            return Self::Valid {
                scanned,
                message: result.message,
                ticket: result.ticket,
                can_confirm,
                offline,
            };
        }
        if result.ticket_status() == Some(TicketStatus::Used) {
            return Self::AlreadyUsed {
                scanned,
                message: result.message,
                used_at: result.used_at,
                offline,
            };
        }
        Self::NotFound {
            scanned,
            message: result.message,
        }
    }

    /// The scanned identifier
    #[must_use]
    pub fn scanned(&self) -> &str {
        match self {
            Self::Valid { scanned, .. }
            | Self::AlreadyUsed { scanned, .. }
            | Self::NotFound { scanned, .. }
            | Self::Unavailable { scanned, .. } => scanned,
        }
    }

    /// Whether the holder may enter
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

impl fmt::Display for Presentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid {
                scanned,
                message,
                ticket,
                offline,
                ..
            } => {
                write!(f, "[VALID] {scanned}: {message}")?;
                if *offline {
                    f.write_str(" (offline)")?;
                }
                if let Some(ticket) = ticket {
                    write_details(f, ticket)?;
                }
                Ok(())
            },
            Self::AlreadyUsed {
                scanned,
                message,
                used_at,
                offline,
            } => {
                write!(f, "[USED] {scanned}: {message}")?;
                if *offline {
                    f.write_str(" (offline)")?;
                }
                if let Some(at) = used_at {
                    write!(f, "\n  Used at: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?;
                }
                Ok(())
            },
            Self::NotFound { scanned, message } => write!(f, "[NOT FOUND] {scanned}: {message}"),
            Self::Unavailable { scanned, message } => write!(f, "[ERROR] {scanned}: {message}"),
        }
    }
}

fn write_details(f: &mut fmt::Formatter<'_>, ticket: &Ticket) -> fmt::Result {
    if let Some(event) = &ticket.event_details {
        match (&event.team_home_name, &event.team_away_name) {
            (Some(home), Some(away)) => write!(f, "\n  Match: {home} vs {away}")?,
            (Some(team), None) | (None, Some(team)) => write!(f, "\n  Match: {team}")?,
            (None, None) => {},
        }
        if let Some(stadium) = &event.stadium_name {
            write!(f, "\n  Stadium: {stadium}")?;
        }
        if let Some(time) = event.time {
            write!(f, "\n  Kick-off: {}", time.format("%Y-%m-%d %H:%M UTC"))?;
        }
    }
    if let Some(kind) = ticket.kind() {
        write!(f, "\n  Type: {kind}")?;
    }
    if let Some(seat) = ticket.seat_label() {
        write!(f, "\n  Seat: {seat}")?;
    }
    Ok(())
}
