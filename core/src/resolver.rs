//! Code resolver: decoded QR scanner output → canonical ticket identifier.

use crate::error::ResolveError;
use crate::types::TicketIdentifier;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the external QR decoder hands over.
///
/// Decoders return either the bare text or a detailed result object carrying
/// the text under `data`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanPayload {
    /// Bare decoded text
    Text(String),
    /// Detailed scan result
    Decoded {
        /// Decoded text
        data: String,
    },
}

impl ScanPayload {
    /// Decoded text, untrimmed
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Decoded { data: text } => text,
        }
    }

    /// Interprets one line of decoder output.
    ///
    /// JSON (a quoted string or a `{"data": ..}` object) is decoded; anything
    /// else, including JSON that does not fit either shape, is taken as text.
    #[must_use]
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('"') {
            if let Ok(payload) = serde_json::from_str(trimmed) {
                return payload;
            }
        }
        Self::Text(input.to_string())
    }
}

impl From<&str> for ScanPayload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ScanPayload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Normalizes scan payloads.
///
/// Canonicalization is a whitespace trim. Strict mode additionally requires a
/// UUID, rejecting anything else before a network call is made.
#[derive(Clone, Copy, Debug, Default)]
pub struct Resolver {
    strict_uuid: bool,
}

impl Resolver {
    /// Lenient resolver (trim only)
    #[must_use]
    pub const fn new() -> Self {
        Self { strict_uuid: false }
    }

    /// Resolver that only accepts UUID identifiers
    #[must_use]
    pub const fn strict() -> Self {
        Self { strict_uuid: true }
    }

    /// Whether UUID shape is enforced
    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict_uuid
    }

    /// Resolve a payload to its canonical identifier.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Empty`] if only whitespace was decoded, and
    /// [`ResolveError::NotUuid`] in strict mode for non-UUID text.
    pub fn resolve(&self, payload: &ScanPayload) -> Result<TicketIdentifier, ResolveError> {
        let canonical = payload.text().trim();

        if canonical.is_empty() {
            return Err(ResolveError::Empty);
        }

        if self.strict_uuid && Uuid::try_parse(canonical).is_err() {
            return Err(ResolveError::NotUuid(canonical.to_string()));
        }

        Ok(TicketIdentifier::new(canonical))
    }
}
