//! HTTP client for the remote ticket authority.

use crate::config::RemoteConfig;
use crate::csrf::CsrfTokenSource;
use gatecheck_core::{
    AuthorityFuture, MarkUsedReceipt, RemoteError, Ticket, TicketAuthority, TicketIdentifier,
    VerificationResult,
};
use metrics::histogram;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Instant;
use tracing::debug;

/// Ticket authority reached over HTTP.
///
/// - `GET  {base}/tickets/verify/{identifier}/` → [`VerificationResult`]
/// - `POST {base}/tickets/verify/{identifier}/` → [`MarkUsedReceipt`]
/// - `GET  {base}/tickets` → the signed-in user's tickets
///
/// The client keeps a cookie store, so session and anti-forgery cookies are
/// sent back with every request.
pub struct HttpTicketAuthority {
    client: Client,
    base_url: Url,
    csrf: CsrfTokenSource,
}

impl HttpTicketAuthority {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] if the base URL does not parse, or
    /// [`RemoteError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .cookie_store(true)
            .build()
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            csrf: CsrfTokenSource::new(
                config.csrf_cookie.clone(),
                config.csrf_header.clone(),
                config.csrf_path.clone(),
            ),
        })
    }

    /// Anti-forgery token source, e.g. to seed a known token
    #[must_use]
    pub const fn csrf(&self) -> &CsrfTokenSource {
        &self.csrf
    }

    /// API base URL
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/tickets/verify/{identifier}/`, with the identifier
    /// percent-encoded as a single path segment.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] for a base URL that cannot carry a path.
    pub fn verify_url(&self, identifier: &TicketIdentifier) -> Result<Url, RemoteError> {
        self.endpoint(&["tickets", "verify", identifier.as_str(), ""])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_verification(
        &self,
        identifier: &TicketIdentifier,
    ) -> Result<VerificationResult, RemoteError> {
        let url = self.verify_url(identifier)?;
        debug!(url = %url, "Looking up ticket");

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        histogram!("gatecheck_remote_duration_seconds", "operation" => "lookup")
            .record(started.elapsed().as_secs_f64());

        Self::decode(response, identifier).await
    }

    async fn submit_mark_used(
        &self,
        identifier: &TicketIdentifier,
    ) -> Result<MarkUsedReceipt, RemoteError> {
        let url = self.verify_url(identifier)?;
        let token = self.csrf.token(&self.client, &self.base_url).await;

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(self.csrf.header_name(), token);
        }

        debug!(identifier = %identifier, "Marking ticket used");
        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        histogram!("gatecheck_remote_duration_seconds", "operation" => "mark_used")
            .record(started.elapsed().as_secs_f64());

        if response.status() == StatusCode::FORBIDDEN {
            // Most likely a stale token; fetch a fresh one next time
            self.csrf.invalidate().await;
        }

        Self::decode(response, identifier).await
    }

    async fn fetch_tickets(&self) -> Result<Vec<Ticket>, RemoteError> {
        let url = self.endpoint(&["tickets"])?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        histogram!("gatecheck_remote_duration_seconds", "operation" => "list")
            .record(started.elapsed().as_secs_f64());

        Self::decode(response, &TicketIdentifier::new("*")).await
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        identifier: &TicketIdentifier,
    ) -> Result<T, RemoteError> {
        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| RemoteError::Malformed(e.to_string())),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound {
                identifier: identifier.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            },
        }
    }
}

impl TicketAuthority for HttpTicketAuthority {
    fn lookup(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, VerificationResult> {
        let identifier = identifier.clone();
        Box::pin(async move { self.fetch_verification(&identifier).await })
    }

    fn mark_used(&self, identifier: &TicketIdentifier) -> AuthorityFuture<'_, MarkUsedReceipt> {
        let identifier = identifier.clone();
        Box::pin(async move { self.submit_mark_used(&identifier).await })
    }

    fn list_tickets(&self) -> AuthorityFuture<'_, Vec<Ticket>> {
        Box::pin(self.fetch_tickets())
    }
}

impl std::fmt::Debug for HttpTicketAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTicketAuthority")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}
