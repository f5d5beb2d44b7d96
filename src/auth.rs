//! OAuth2 plumbing for Gmail access from a stored refresh token
//!
//! The authorization-code exchange happens elsewhere; this module only turns
//! an already-issued refresh token into an authenticated Gmail hub.

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use yup_oauth2::authorized_user::AuthorizedUserSecret;

use crate::config::ProviderConfig;
use crate::error::{FootprintError, Result};

/// Read access for scans and reply-thread sync
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Send access for privacy requests
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

/// Scopes a stored connection must carry
pub const REQUIRED_SCOPES: &[&str] = &[GMAIL_READONLY_SCOPE, GMAIL_SEND_SCOPE];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// OAuth client identity used to refresh access tokens
#[derive(Clone)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Pull the OAuth client identity out of configuration
///
/// `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` have already been overlaid by
/// [`Config::apply_env`](crate::config::Config::apply_env).
pub fn load_client_secret(provider: &ProviderConfig) -> Result<ClientSecret> {
    if provider.client_id.trim().is_empty() {
        return Err(FootprintError::Config(
            "GOOGLE_CLIENT_ID is not configured".to_string(),
        ));
    }
    if provider.client_secret.trim().is_empty() {
        return Err(FootprintError::Config(
            "GOOGLE_CLIENT_SECRET is not configured".to_string(),
        ));
    }
    Ok(ClientSecret {
        client_id: provider.client_id.trim().to_string(),
        client_secret: provider.client_secret.trim().to_string(),
    })
}

/// Split a space-separated scope string and report any required scope it lacks
pub fn missing_scopes(granted: &str) -> Vec<&'static str> {
    let granted: Vec<&str> = granted.split_whitespace().collect();
    REQUIRED_SCOPES
        .iter()
        .copied()
        .filter(|s| !granted.contains(s))
        .collect()
}

/// Build an authenticated Gmail hub from a decrypted refresh token
///
/// An access token is requested up front so a revoked or mistyped refresh
/// token fails here rather than halfway through a scan.
pub async fn build_gmail_hub(secret: &ClientSecret, refresh_token: &str) -> Result<GmailHub> {
    let authorized = AuthorizedUserSecret {
        client_id: secret.client_id.clone(),
        client_secret: secret.client_secret.clone(),
        refresh_token: refresh_token.to_string(),
        key_type: "authorized_user".to_string(),
    };

    let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(authorized)
        .build()
        .await
        .map_err(|e| {
            FootprintError::Authentication(format!("Failed to build authenticator: {}", e))
        })?;

    auth.token(REQUIRED_SCOPES).await.map_err(|e| {
        FootprintError::Authentication(format!("Failed to obtain access token: {}", e))
    })?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| FootprintError::Config(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}
