// Email/password sign-in
//
// Talks to the identity toolkit `accounts:signInWithPassword` endpoint.
// A successful sign-in yields an ID token that the database accepts as
// its `auth` query parameter. Token refresh is not handled here; callers
// sign in again when the database starts answering "Permission denied".

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Default identity toolkit endpoint.
pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1/";

/// An authenticated user handle.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Email the account signed in with.
    pub email: String,
    /// Stable account identifier.
    pub local_id: String,
    /// Bearer token for database requests.
    pub id_token: SecretString,
    /// Token lifetime in seconds, as reported by the server.
    pub expires_in_secs: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    email: Option<String>,
    local_id: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct IdentityErrorEnvelope {
    error: IdentityError,
}

#[derive(Deserialize)]
struct IdentityError {
    message: String,
}

/// Client for the email/password identity endpoint.
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: SecretString,
}

impl IdentityClient {
    /// Create a new identity client.
    ///
    /// `base_url` is the toolkit root (see [`DEFAULT_IDENTITY_URL`]);
    /// `api_key` is the project's web API key.
    pub fn new(
        base_url: Url,
        api_key: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            api_key,
        })
    }

    /// Create an identity client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, api_key: SecretString) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthSession, Error> {
        // Leading "./" keeps `accounts:` from parsing as a URL scheme.
        let mut url = self.base_url.join("./accounts:signInWithPassword")?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());

        debug!(email, "signing in");

        let body = json!({
            "email": email,
            "password": password.expose_secret(),
            "returnSecureToken": true,
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            let code = serde_json::from_str::<IdentityErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(Error::Authentication {
                message: describe_identity_error(&code),
            });
        }

        let parsed: SignInResponse =
            serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.clone(),
            })?;

        debug!(local_id = %parsed.local_id, "sign-in successful");

        Ok(AuthSession {
            email: parsed.email.unwrap_or_else(|| email.to_owned()),
            local_id: parsed.local_id,
            id_token: SecretString::from(parsed.id_token),
            expires_in_secs: parsed
                .expires_in
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
        })
    }
}

/// Turn an identity toolkit error code into a readable message.
///
/// Codes may carry a suffix (`"TOO_MANY_ATTEMPTS_TRY_LATER : ..."`).
fn describe_identity_error(code: &str) -> String {
    let head = code.split(" : ").next().unwrap_or(code).trim();
    match head {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "wrong email or password".into()
        }
        "USER_DISABLED" => "account disabled by an administrator".into(),
        "INVALID_EMAIL" => "malformed email address".into(),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "too many attempts, try again later".into(),
        "API_KEY_INVALID" | "INVALID_API_KEY" => "invalid web API key".into(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_codes_collapse_to_one_message() {
        assert_eq!(describe_identity_error("EMAIL_NOT_FOUND"), "wrong email or password");
        assert_eq!(describe_identity_error("INVALID_PASSWORD"), "wrong email or password");
        assert_eq!(
            describe_identity_error("INVALID_LOGIN_CREDENTIALS"),
            "wrong email or password"
        );
    }

    #[test]
    fn suffixed_codes_are_trimmed() {
        assert_eq!(
            describe_identity_error("TOO_MANY_ATTEMPTS_TRY_LATER : Access disabled"),
            "too many attempts, try again later"
        );
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(describe_identity_error("OPERATION_NOT_ALLOWED"), "OPERATION_NOT_ALLOWED");
    }
}
