// Realtime Database REST client
//
// Wraps `reqwest::Client` with path-to-URL construction (`{base}/{path}.json`),
// optional `auth` query token injection, and Firebase error envelope
// decoding. Every method returns the raw `serde_json::Value` payload;
// interpreting it is the caller's business.

use std::sync::RwLock;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Error envelope the database returns on failure: `{"error": "Permission denied"}`.
#[derive(serde::Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// Raw HTTP client for a Realtime Database instance.
///
/// Paths are slash-separated (`"pulseras/B1"`); empty segments are ignored
/// and each segment is percent-encoded, so ids never escape their node.
pub struct DatabaseClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    /// ID token from a signed-in session, sent as the `auth` query param.
    auth_token: RwLock<Option<SecretString>>,
}

impl DatabaseClient {
    /// Create a new database client from a `TransportConfig`.
    ///
    /// `base_url` is the database root, e.g.
    /// `https://my-project-default-rtdb.firebaseio.com`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
            auth_token: RwLock::new(None),
        })
    }

    /// Create a database client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout: TransportConfig::default().timeout,
            auth_token: RwLock::new(None),
        }
    }

    /// The database root URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Auth token management ─────────────────────────────────────────

    /// Attach an ID token to every subsequent request.
    pub fn set_auth_token(&self, token: SecretString) {
        debug!("attaching auth token to database requests");
        *self.auth_token.write().expect("auth token lock poisoned") = Some(token);
    }

    /// Stop sending an ID token.
    pub fn clear_auth_token(&self) {
        *self.auth_token.write().expect("auth token lock poisoned") = None;
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token
            .read()
            .expect("auth token lock poisoned")
            .is_some()
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build the REST URL for a node: `{base}/{seg}/{seg}.json[?auth=...]`.
    pub fn json_url(&self, path: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segs.pop_if_empty();
            match segments.split_last() {
                Some((last, parents)) => {
                    segs.extend(parents);
                    segs.push(&format!("{last}.json"));
                }
                None => {
                    segs.push(".json");
                }
            }
        }

        let guard = self.auth_token.read().expect("auth token lock poisoned");
        if let Some(token) = guard.as_ref() {
            url.query_pairs_mut()
                .append_pair("auth", token.expose_secret());
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Read the value at `path`. A missing node yields `Value::Null`.
    pub async fn get(&self, path: &str) -> Result<serde_json::Value, Error> {
        debug!(path, "GET");
        let url = self.json_url(path)?;
        let resp = self.send(self.http.get(url)).await?;
        self.parse_response(resp).await
    }

    /// Replace the value at `path` with `body`. Returns the written value.
    pub async fn put(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<serde_json::Value, Error> {
        debug!(path, "PUT");
        let url = self.json_url(path)?;
        let resp = self.send(self.http.put(url).json(body)).await?;
        self.parse_response(resp).await
    }

    /// Delete the node at `path`. Deleting a missing node succeeds.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        debug!(path, "DELETE");
        let url = self.json_url(path)?;
        let resp = self.send(self.http.delete(url)).await?;
        self.parse_response(resp).await.map(|_| ())
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                Error::Transport(e)
            }
        })
    }

    /// Decode a response body, turning error statuses into typed errors.
    async fn parse_response(&self, resp: reqwest::Response) -> Result<serde_json::Value, Error> {
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(%status, len = body.len(), "database response");

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body).map_or_else(
                |_| body.chars().take(200).collect::<String>(),
                |env| env.error,
            );
            return Err(match status {
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                    Error::PermissionDenied { message }
                }
                _ => Error::Database {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> DatabaseClient {
        DatabaseClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn json_url_appends_suffix_to_last_segment() {
        let c = client("https://demo.firebaseio.com");
        let url = c.json_url("pulseras/B1").unwrap();
        assert_eq!(url.as_str(), "https://demo.firebaseio.com/pulseras/B1.json");
    }

    #[test]
    fn json_url_root_and_trailing_slash() {
        let c = client("https://demo.firebaseio.com/");
        assert_eq!(
            c.json_url("").unwrap().as_str(),
            "https://demo.firebaseio.com/.json"
        );
        assert_eq!(
            c.json_url("/pulseras/").unwrap().as_str(),
            "https://demo.firebaseio.com/pulseras.json"
        );
    }

    #[test]
    fn json_url_encodes_segments() {
        let c = client("https://demo.firebaseio.com");
        let url = c.json_url("pulseras/pulsera uno").unwrap();
        assert_eq!(
            url.as_str(),
            "https://demo.firebaseio.com/pulseras/pulsera%20uno.json"
        );
    }

    #[test]
    fn json_url_carries_auth_token() {
        let c = client("https://demo.firebaseio.com");
        c.set_auth_token(SecretString::from("tok123".to_owned()));
        let url = c.json_url("pulseras").unwrap();
        assert_eq!(url.query(), Some("auth=tok123"));
        assert!(c.has_auth_token());

        c.clear_auth_token();
        assert_eq!(c.json_url("pulseras").unwrap().query(), None);
    }
}
