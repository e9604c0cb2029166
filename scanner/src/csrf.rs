//! Anti-forgery token handling for mutation requests.
//!
//! The ticketing backend only accepts a `POST` that echoes its CSRF cookie in
//! a header. The token is fetched once, on first need, and reused.

use gatecheck_core::RemoteError;
use reqwest::{Client, Url};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Lazily fetched, cached anti-forgery token.
#[derive(Debug)]
pub struct CsrfTokenSource {
    cookie_name: String,
    header_name: String,
    path: String,
    cached: RwLock<Option<String>>,
}

impl CsrfTokenSource {
    /// Token read from cookie `cookie_name`, sent as `header_name`, obtained
    /// by a `GET` on `path` relative to the API base URL.
    #[must_use]
    pub fn new(
        cookie_name: impl Into<String>,
        header_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            header_name: header_name.into(),
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Header the token is sent in
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Seeds the cache with a known token.
    pub async fn set(&self, token: impl Into<String>) {
        *self.cached.write().await = Some(token.into());
    }

    /// Forgets the cached token so the next call fetches a fresh one.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// The token, fetching it if none is cached.
    ///
    /// A missing token is not an error: the request goes out without the
    /// header and the authority decides.
    pub async fn token(&self, client: &Client, base_url: &Url) -> Option<String> {
        if let Some(token) = self.cached.read().await.clone() {
            return Some(token);
        }

        match self.fetch(client, base_url).await {
            Ok(Some(token)) => {
                debug!(cookie = %self.cookie_name, "Fetched anti-forgery token");
                *self.cached.write().await = Some(token.clone());
                Some(token)
            },
            Ok(None) => {
                debug!(cookie = %self.cookie_name, "Authority did not set an anti-forgery cookie");
                None
            },
            Err(e) => {
                warn!(error = %e, "Could not fetch anti-forgery token");
                None
            },
        }
    }

    async fn fetch(&self, client: &Client, base_url: &Url) -> Result<Option<String>, RemoteError> {
        let mut url = base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidUrl(base_url.to_string()))?
            .pop_if_empty()
            .extend(self.path.trim_start_matches('/').split('/'));

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        Ok(response
            .cookies()
            .find(|cookie| cookie.name() == self.cookie_name)
            .map(|cookie| cookie.value().to_string()))
    }
}
